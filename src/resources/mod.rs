//! Reconcilers for the supported resource kinds.
//!
//! Each submodule defines the typed desired state of one kind and a
//! [`Reconciler`](crate::reconcile::Reconciler) translating it into
//! [`TfeClient`] calls.

pub mod organization_vcs;
pub mod registry_module;
pub mod sentinel_policy;
pub mod team_access;
pub mod variable;

use std::sync::Arc;

use crate::client::{ClientError, TfeClient, Workspace};
use crate::error::ProviderError;
use crate::id::WorkspaceId;
use crate::reconcile::{Managed, ResourceHandler};

pub use organization_vcs::{OrganizationVcsReconciler, OrganizationVcsState};
pub use registry_module::{RegistryModuleReconciler, RegistryModuleState};
pub use sentinel_policy::{SentinelPolicyReconciler, SentinelPolicyState};
pub use team_access::{TeamAccessReconciler, TeamAccessState};
pub use variable::{VariableReconciler, VariableState};

/// Handlers for every supported resource kind, sharing one client.
pub fn handlers(client: Arc<dyn TfeClient>) -> Vec<Box<dyn ResourceHandler>> {
    vec![
        Box::new(Managed::new(OrganizationVcsReconciler::new(client.clone()))),
        Box::new(Managed::new(RegistryModuleReconciler::new(client.clone()))),
        Box::new(Managed::new(SentinelPolicyReconciler::new(client.clone()))),
        Box::new(Managed::new(TeamAccessReconciler::new(client.clone()))),
        Box::new(Managed::new(VariableReconciler::new(client))),
    ]
}

/// Look a workspace up by its packed reference. Absence is reported as a
/// missing dependency of the resource being reconciled.
pub(crate) async fn resolve_workspace(
    client: &dyn TfeClient,
    id: &WorkspaceId,
) -> Result<Workspace, ProviderError> {
    client
        .read_workspace(&id.organization, &id.name)
        .await
        .map_err(|err| match err {
            ClientError::NotFound => ProviderError::DependencyNotFound {
                kind: "workspace",
                name: id.pack(),
            },
            err => ProviderError::remote("retrieving", "workspace", id.pack(), err),
        })
}
