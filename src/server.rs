//! Server helpers for running providers.
//!
//! This module provides the `ProviderService` trait that providers implement,
//! and the `serve` functions that speak the provider protocol over stdio.
//!
//! # Protocol
//!
//! On start the provider writes one handshake line to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|stdio
//! ```
//!
//! After that every line on stdin is one JSON [`Request`], tagged by its
//! `method`, and every line on stdout is the matching [`Response`]. Requests
//! are handled one at a time, in order. Logs go to stderr.
//!
//! ```text
//! > {"method":"read","resource_type":"tfe_variable","current_state":{"id":"var-1",...}}
//! < {"result":{"id":"var-1",...}}
//! ```
//!
//! # Signal Handling
//!
//! The server handles OS signals (SIGTERM, SIGINT) for graceful shutdown.
//! When a signal is received, the server:
//! 1. Stops reading new requests
//! 2. Waits for the in-flight request to complete (with configurable timeout)
//! 3. Calls the provider's `stop()` method
//! 4. Exits cleanly

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{
    ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, HANDSHAKE_TRANSPORT,
    PROTOCOL_VERSION,
};

/// Trait that provider implementations must implement.
///
/// Resource states are passed as JSON objects. A read that finds nothing
/// returns `None`, which tells the orchestrator to forget the resource.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata.
    /// By default, this is derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let mut resources: Vec<String> = self.schema().resources.into_keys().collect();
        resources.sort();
        ProviderMetadata { resources }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    /// Returns diagnostics (errors and warnings).
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider.
    /// Returns diagnostics (errors and warnings).
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Plan changes for a resource. `prior_state` is `None` for a create and
    /// `proposed_state` is null for a destroy.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Read the current state of a resource; `None` if it no longer exists.
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        _id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }
}

/// One protocol request, tagged by `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Resource type names.
    GetMetadata,
    /// Full provider schema.
    GetSchema,
    /// Validate a provider configuration block.
    ValidateProviderConfig {
        /// Provider configuration.
        #[serde(default)]
        config: Value,
    },
    /// Configure the provider.
    Configure {
        /// Provider configuration.
        #[serde(default)]
        config: Value,
    },
    /// Stop the provider and end the session.
    Stop,
    /// Validate a resource configuration.
    ValidateResourceConfig {
        /// Resource type name.
        resource_type: String,
        /// Resource configuration.
        config: Value,
    },
    /// Plan a create, update or destroy.
    Plan {
        /// Resource type name.
        resource_type: String,
        /// Recorded state; absent for a create.
        #[serde(default)]
        prior_state: Option<Value>,
        /// Desired state; null for a destroy.
        #[serde(default)]
        proposed_state: Value,
    },
    /// Create a resource.
    Create {
        /// Resource type name.
        resource_type: String,
        /// Planned state.
        planned_state: Value,
    },
    /// Refresh a resource.
    Read {
        /// Resource type name.
        resource_type: String,
        /// Recorded state.
        current_state: Value,
    },
    /// Update a resource in place.
    Update {
        /// Resource type name.
        resource_type: String,
        /// Recorded state.
        prior_state: Value,
        /// Planned state.
        planned_state: Value,
    },
    /// Delete a resource.
    Delete {
        /// Resource type name.
        resource_type: String,
        /// Recorded state.
        current_state: Value,
    },
    /// Import an existing object.
    ImportResource {
        /// Resource type name.
        resource_type: String,
        /// Remote identifier.
        id: String,
    },
}

impl Request {
    /// The protocol method name.
    pub fn method(&self) -> &'static str {
        match self {
            Request::GetMetadata => "get_metadata",
            Request::GetSchema => "get_schema",
            Request::ValidateProviderConfig { .. } => "validate_provider_config",
            Request::Configure { .. } => "configure",
            Request::Stop => "stop",
            Request::ValidateResourceConfig { .. } => "validate_resource_config",
            Request::Plan { .. } => "plan",
            Request::Create { .. } => "create",
            Request::Read { .. } => "read",
            Request::Update { .. } => "update",
            Request::Delete { .. } => "delete",
            Request::ImportResource { .. } => "import_resource",
        }
    }
}

/// One protocol response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    /// Operation result; null when the operation returns nothing or the
    /// resource no longer exists.
    #[serde(default)]
    pub result: Value,
    /// Diagnostics, including one error diagnostic when the operation failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    /// Machine-readable error code when the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Response {
    /// A successful response.
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    /// A response carrying validation diagnostics.
    pub fn with_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics,
            ..Default::default()
        }
    }

    /// A failed response.
    pub fn failed(err: &ProviderError) -> Self {
        Self {
            result: Value::Null,
            diagnostics: vec![Diagnostic::error(err.to_string())],
            error_code: Some(err.code().to_string()),
        }
    }

    /// Whether the operation failed.
    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }
}

fn respond<T: Serialize>(method: &str, result: Result<T, ProviderError>) -> Response {
    let outcome = result.and_then(|value| serde_json::to_value(value).map_err(ProviderError::from));
    match outcome {
        Ok(value) => {
            debug!(method, "Request completed");
            Response::ok(value)
        },
        Err(err) => {
            error!(method, error = %err, code = err.code(), "Request failed");
            Response::failed(&err)
        },
    }
}

fn respond_diagnostics(method: &str, result: Result<Vec<Diagnostic>, ProviderError>) -> Response {
    match result {
        Ok(diagnostics) => {
            if diagnostics.iter().any(Diagnostic::is_error) {
                warn!(method, diagnostics = diagnostics.len(), "Request completed with errors");
            } else {
                debug!(method, "Request completed");
            }
            Response::with_diagnostics(diagnostics)
        },
        Err(err) => {
            error!(method, error = %err, "Request failed");
            Response::failed(&err)
        },
    }
}

/// Handle one request.
pub async fn dispatch<P: ProviderService + ?Sized>(provider: &P, request: Request) -> Response {
    let method = request.method();
    debug!(method, "Request received");
    match request {
        Request::GetMetadata => respond(method, Ok(provider.metadata())),
        Request::GetSchema => respond(method, Ok(provider.schema())),
        Request::ValidateProviderConfig { config } => {
            respond_diagnostics(method, provider.validate_provider_config(config).await)
        },
        Request::Configure { config } => respond_diagnostics(method, provider.configure(config).await),
        Request::Stop => respond(method, provider.stop().await),
        Request::ValidateResourceConfig {
            resource_type,
            config,
        } => respond_diagnostics(
            method,
            provider.validate_resource_config(&resource_type, config).await,
        ),
        Request::Plan {
            resource_type,
            prior_state,
            proposed_state,
        } => respond(
            method,
            provider.plan(&resource_type, prior_state, proposed_state).await,
        ),
        Request::Create {
            resource_type,
            planned_state,
        } => respond(method, provider.create(&resource_type, planned_state).await),
        Request::Read {
            resource_type,
            current_state,
        } => respond(method, provider.read(&resource_type, current_state).await),
        Request::Update {
            resource_type,
            prior_state,
            planned_state,
        } => respond(
            method,
            provider.update(&resource_type, prior_state, planned_state).await,
        ),
        Request::Delete {
            resource_type,
            current_state,
        } => respond(method, provider.delete(&resource_type, current_state).await),
        Request::ImportResource { resource_type, id } => {
            respond(method, provider.import_resource(&resource_type, &id).await)
        },
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Timeout for graceful shutdown. After receiving a shutdown signal,
    /// the server will wait this long for the in-flight request to complete,
    /// and as long again for the provider to stop.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// The handshake line written before any response.
pub fn handshake() -> String {
    format!(
        "{}|{}|{}",
        HANDSHAKE_PREFIX, PROTOCOL_VERSION, HANDSHAKE_TRANSPORT
    )
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// On Unix, this waits for SIGTERM or SIGINT.
/// On Windows, this waits for CTRL+C.
/// If no handler can be installed the server runs until its input closes.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                }
            },
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "Failed to install signal handlers");
                std::future::pending::<()>().await;
            },
        }
    }

    #[cfg(windows)]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received CTRL+C, initiating graceful shutdown"),
            Err(err) => {
                warn!(error = %err, "Failed to install CTRL+C handler");
                std::future::pending::<()>().await;
            },
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider over stdin/stdout.
///
/// This function:
/// 1. Outputs the handshake string to stdout
/// 2. Answers one request per input line until stdin closes or `stop` is requested
/// 3. Handles shutdown signals (SIGTERM/SIGINT) gracefully
///
/// For custom configuration, use [`serve_with_options`].
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), ProviderError> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options.
///
/// See [`serve`] for details. This function allows configuring
/// shutdown behavior via [`ServeOptions`].
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    serve_with_shutdown(
        provider,
        tokio::io::stdin(),
        tokio::io::stdout(),
        wait_for_shutdown_signal(),
        options,
    )
    .await
}

/// Serve a provider on arbitrary streams until `shutdown` resolves, the input
/// closes, or a `stop` request arrives.
pub async fn serve_with_shutdown<P, R, W, S>(
    provider: P,
    reader: R,
    mut writer: W,
    shutdown: S,
    options: ServeOptions,
) -> Result<(), ProviderError>
where
    P: ProviderService,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    writer.write_all(handshake().as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    info!(protocol_version = PROTOCOL_VERSION, "Provider server starting");

    let mut lines = SplitStream::new(BufReader::new(reader).split(b'\n'));
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            next = lines.next() => match next {
                Some(line) => line?,
                None => {
                    debug!("Input closed");
                    break;
                },
            },
        };
        let line = match String::from_utf8(line) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Request is not valid UTF-8");
                let response = Response::failed(&ProviderError::InvalidRequest(format!(
                    "request is not valid UTF-8: {}",
                    err
                )));
                write_response(&mut writer, &response).await?;
                continue;
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<Request>(&line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "Malformed request");
                let response = Response::failed(&ProviderError::InvalidRequest(err.to_string()));
                write_response(&mut writer, &response).await?;
                continue;
            },
        };

        if matches!(request, Request::Stop) {
            let response = dispatch(&provider, request).await;
            write_response(&mut writer, &response).await?;
            info!("Provider shutdown complete");
            return Ok(());
        }

        let in_flight = dispatch(&provider, request);
        tokio::pin!(in_flight);
        let mut shutting_down = false;
        let response = tokio::select! {
            response = &mut in_flight => Some(response),
            _ = &mut shutdown => {
                shutting_down = true;
                match tokio::time::timeout(options.shutdown_timeout, &mut in_flight).await {
                    Ok(response) => Some(response),
                    Err(_) => {
                        warn!(
                            timeout = ?options.shutdown_timeout,
                            "Shutdown timeout exceeded, abandoning in-flight request"
                        );
                        None
                    },
                }
            },
        };
        if let Some(response) = response {
            write_response(&mut writer, &response).await?;
        }
        if shutting_down {
            break;
        }
    }

    debug!("Calling provider stop()");
    match tokio::time::timeout(options.shutdown_timeout, provider.stop()).await {
        Ok(Ok(())) => {},
        Ok(Err(err)) => warn!(error = %err, "Provider stop() returned error"),
        Err(_) => warn!(timeout = ?options.shutdown_timeout, "Provider stop() timed out"),
    }

    info!("Provider shutdown complete");
    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> Result<(), ProviderError> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::provider::TfeProvider;
    use crate::testing::MemoryClient;
    use serde_json::json;

    fn provider() -> TfeProvider {
        TfeProvider::new(Arc::new(
            MemoryClient::new()
                .with_team("team-1", "ops")
                .with_workspace("acme", "prod"),
        ))
    }

    async fn run(input: &[u8]) -> Vec<String> {
        let mut output = Vec::new();
        serve_with_shutdown(
            provider(),
            input,
            &mut output,
            std::future::pending(),
            ServeOptions::default(),
        )
        .await
        .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn parse(line: &str) -> Response {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn test_handshake() {
        assert_eq!(handshake(), "HEMMER_PROVIDER|1|stdio");
    }

    #[test]
    fn test_request_wire_format() {
        let request: Request = serde_json::from_value(json!({
            "method": "plan",
            "resource_type": "tfe_variable",
            "proposed_state": {"key": "region"}
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::Plan {
                resource_type: "tfe_variable".to_string(),
                prior_state: None,
                proposed_state: json!({"key": "region"}),
            }
        );
        assert_eq!(request.method(), "plan");

        let request: Request = serde_json::from_str(r#"{"method":"get_metadata"}"#).unwrap();
        assert_eq!(request, Request::GetMetadata);
    }

    #[test]
    fn test_response_wire_format() {
        let ok = serde_json::to_value(Response::ok(json!({"id": "pol-1"}))).unwrap();
        assert_eq!(ok, json!({"result": {"id": "pol-1"}}));

        let failed = Response::failed(&ProviderError::UnknownResource("tfe_x".to_string()));
        assert!(failed.is_error());
        let failed = serde_json::to_value(failed).unwrap();
        assert_eq!(failed["error_code"], "unknown_resource");
        assert_eq!(failed["diagnostics"][0]["severity"], "error");
    }

    #[tokio::test]
    async fn test_dispatch_metadata() {
        let response = dispatch(&provider(), Request::GetMetadata).await;
        assert!(!response.is_error());
        assert_eq!(response.result["resources"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_dispatch_read_of_missing_resource() {
        let response = dispatch(
            &provider(),
            Request::Read {
                resource_type: "tfe_sentinel_policy".to_string(),
                current_state: json!({
                    "id": "pol-404",
                    "name": "policy-test",
                    "organization": "acme",
                    "policy": "main = rule { true }",
                    "enforce_mode": "advisory"
                }),
            },
        )
        .await;
        assert!(!response.is_error());
        assert!(response.result.is_null());
    }

    #[tokio::test]
    async fn test_dispatch_validation_failure() {
        let response = dispatch(
            &provider(),
            Request::Create {
                resource_type: "tfe_team_access".to_string(),
                planned_state: json!({"access": "write", "team_id": "team-1"}),
            },
        )
        .await;
        assert_eq!(response.error_code.as_deref(), Some("validation"));
        assert!(response.diagnostics[0].summary.contains("workspace_id"));
    }

    #[tokio::test]
    async fn test_serve_session() {
        let input = [
            r#"{"method":"get_metadata"}"#,
            "",
            "not json",
            r#"{"method":"create","resource_type":"tfe_team_access","planned_state":{"access":"read","team_id":"team-1","workspace_id":"acme/prod"}}"#,
        ]
        .join("\n");

        let lines = run(input.as_bytes()).await;
        assert_eq!(lines[0], "HEMMER_PROVIDER|1|stdio");
        assert_eq!(lines.len(), 4);

        let metadata = parse(&lines[1]);
        assert!(!metadata.is_error());

        let malformed = parse(&lines[2]);
        assert_eq!(malformed.error_code.as_deref(), Some("invalid_request"));

        let created = parse(&lines[3]);
        assert!(!created.is_error());
        assert_eq!(created.result["workspace_id"], "acme/prod");
        assert!(created.result["id"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_keeps_session() {
        let lines = run(b"\xff\xfe garbage\n{\"method\":\"get_metadata\"}\n").await;
        assert_eq!(lines.len(), 3);

        let rejected = parse(&lines[1]);
        assert_eq!(rejected.error_code.as_deref(), Some("invalid_request"));
        assert!(rejected.diagnostics[0].summary.contains("UTF-8"));

        let metadata = parse(&lines[2]);
        assert!(!metadata.is_error());
        assert_eq!(metadata.result["resources"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_stop_ends_session() {
        let input = [
            r#"{"method":"stop"}"#,
            r#"{"method":"get_metadata"}"#,
        ]
        .join("\n");

        let lines = run(input.as_bytes()).await;
        assert_eq!(lines.len(), 2);
        assert!(!parse(&lines[1]).is_error());
    }

    #[tokio::test]
    async fn test_shutdown_stops_reading() {
        let (mut client_side, server_side) = tokio::io::duplex(1024);
        let mut output = Vec::new();

        // The input never closes; only the shutdown future ends the session
        client_side
            .write_all(b"{\"method\":\"get_metadata\"}\n")
            .await
            .unwrap();
        serve_with_shutdown(
            provider(),
            server_side,
            &mut output,
            tokio::time::sleep(Duration::from_millis(50)),
            ServeOptions::new().with_shutdown_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "HEMMER_PROVIDER|1|stdio");
        drop(client_side);
    }
}
