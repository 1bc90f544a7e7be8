//! Hemmer Provider for Terraform Enterprise
//!
//! This crate maps declarative configuration blocks onto calls against the
//! Terraform Enterprise API. It manages five resource types:
//!
//! | resource type          | remote object                  |
//! |------------------------|--------------------------------|
//! | `tfe_organization_vcs` | OAuth client (VCS connection)  |
//! | `tfe_registry_module`  | private registry module        |
//! | `tfe_sentinel_policy`  | Sentinel policy                |
//! | `tfe_team_access`      | team access grant on a workspace |
//! | `tfe_variable`         | workspace variable             |
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Reconcilers**: one per resource type, translating desired state into
//!   [`TfeClient`] calls (see [`resources`])
//! - **TfeProvider**: registers the reconcilers and implements [`ProviderService`]
//! - **Server helpers**: the handshake and a line-delimited JSON protocol on stdio
//! - **Testing**: an in-memory [`TfeClient`] and a [`testing::ProviderTester`] harness
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! The HTTP client for the API is not part of this crate. Implement
//! [`TfeClient`] for it and hand it to [`TfeProvider::new`].
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use hemmer_provider_tfe::{init_logging, serve, TfeProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     let client = Arc::new(MyHttpClient::from_env()?);
//!     serve(TfeProvider::new(client)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When a provider starts via [`serve`], it outputs a handshake string to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|stdio
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<transport>`
//!
//! Every following line on stdin is a JSON [`Request`] and is answered by one
//! JSON [`Response`] line on stdout. The methods are `get_metadata`,
//! `get_schema`, `validate_provider_config`, `configure`, `stop`,
//! `validate_resource_config`, `plan`, `create`, `read`, `update`, `delete`
//! and `import_resource`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod id;
pub mod logging;
pub mod provider;
pub mod reconcile;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use client::{ClientError, TfeClient};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use id::WorkspaceId;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::TfeProvider;
pub use schema::ProviderSchema;
pub use server::{
    dispatch, handshake, serve, serve_with_options, serve_with_shutdown, ProviderService,
    Request, Response, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};
