//! The Terraform Enterprise provider.
//!
//! [`TfeProvider`] registers one handler per resource kind and implements
//! [`ProviderService`] by dispatching on the resource type name. Every remote
//! operation is bounded by the configured request timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::client::TfeClient;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::reconcile::ResourceHandler;
use crate::resources;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult, ProviderMetadata};
use crate::validation::validate;

/// Provider managing Terraform Enterprise objects through a [`TfeClient`].
pub struct TfeProvider {
    handlers: HashMap<&'static str, Box<dyn ResourceHandler>>,
    config: RwLock<ProviderConfig>,
}

impl TfeProvider {
    /// Create a provider using `client` for every remote call.
    pub fn new(client: Arc<dyn TfeClient>) -> Self {
        let handlers = resources::handlers(client)
            .into_iter()
            .map(|handler| (handler.type_name(), handler))
            .collect();
        Self {
            handlers,
            config: RwLock::new(ProviderConfig::default()),
        }
    }

    /// Replace the configuration, as `configure` would.
    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        *self
            .config
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = config;
        self
    }

    /// The current configuration.
    pub fn config(&self) -> ProviderConfig {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self, resource_type: &str) -> Result<&dyn ResourceHandler, ProviderError> {
        self.handlers
            .get(resource_type)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    /// Run `operation` within the request timeout.
    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        resource_type: &str,
        future: F,
    ) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let timeout = self.config().request_timeout;
        match tokio::time::timeout(timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, resource_type, timeout = ?timeout, "Operation timed out");
                Err(ProviderError::DeadlineExceeded(format!(
                    "{} of {} did not complete within {:?}",
                    operation, resource_type, timeout
                )))
            },
        }
    }
}

#[async_trait]
impl ProviderService for TfeProvider {
    fn schema(&self) -> ProviderSchema {
        self.handlers.values().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, handler| schema.with_resource(handler.type_name(), handler.schema().clone()),
        )
    }

    fn metadata(&self) -> ProviderMetadata {
        let mut resources: Vec<String> = self.handlers.keys().map(|name| name.to_string()).collect();
        resources.sort();
        ProviderMetadata { resources }
    }

    #[instrument(skip(self, config))]
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = if config.is_null() { json!({}) } else { config };
        let mut diagnostics = validate(&ProviderConfig::schema(), &config);
        if diagnostics.is_empty() {
            if let Err(err) = ProviderConfig::from_value(&config) {
                diagnostics.push(
                    Diagnostic::error("Invalid provider configuration").with_detail(err.to_string()),
                );
            }
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = self.validate_provider_config(config.clone()).await?;
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Ok(diagnostics);
        }

        let parsed = ProviderConfig::from_value(&config)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = parsed;
        info!(request_timeout = ?parsed.request_timeout, "Provider configured");
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Provider stopping");
        Ok(())
    }

    #[instrument(skip(self, config))]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(self.handler(resource_type)?.validate(&config))
    }

    #[instrument(skip(self, prior_state, proposed_state))]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        let plan = self
            .handler(resource_type)?
            .plan(prior_state.as_ref(), proposed_state)?;
        debug!(
            changes = plan.changes.len(),
            requires_replace = plan.requires_replace,
            "Planned"
        );
        Ok(plan)
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let handler = self.handler(resource_type)?;
        let state = self
            .bounded("create", resource_type, handler.create(planned_state))
            .await?;
        info!(id = %state["id"], "Created");
        Ok(state)
    }

    #[instrument(skip(self, current_state))]
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let handler = self.handler(resource_type)?;
        self.bounded("read", resource_type, handler.read(current_state))
            .await
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.handler(resource_type)?;
        let state = self
            .bounded("update", resource_type, handler.update(prior_state, planned_state))
            .await?;
        info!(id = %state["id"], "Updated");
        Ok(state)
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let handler = self.handler(resource_type)?;
        self.bounded("delete", resource_type, handler.delete(current_state))
            .await?;
        info!("Deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let handler = self.handler(resource_type)?;
        let state = self
            .bounded("import", resource_type, handler.import(id))
            .await?;
        info!("Imported");
        Ok(vec![ImportedResource::new(resource_type, state)])
    }
}
