//! `tfe_registry_module`: a private registry module published from a VCS
//! repository.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{
    ClientError, RegistryModule, RegistryModuleCreateOptions, RegistryModuleVcsRepo, TfeClient,
};
use crate::error::ProviderError;
use crate::reconcile::{ReadOutcome, Reconciler, Record};
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const TYPE_NAME: &str = "tfe_registry_module";

const KIND: &str = "registry module";

/// Desired state of a registry module. The name and provider are derived by
/// the API from the repository and only known after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryModuleState {
    /// Owning organization name.
    pub organization: String,
    /// Identifier of the OAuth token used to access the repository.
    pub oauth_token: String,
    /// Repository identifier, `<owner>/terraform-<provider>-<name>`.
    pub repo: String,
    /// `<organization>/<name>/<provider>`.
    pub module_id: Option<String>,
    /// Module provider, e.g. `aws`.
    pub module_provider: Option<String>,
    /// Latest published version.
    pub version: Option<String>,
    /// Module name.
    pub name: Option<String>,
}

impl RegistryModuleState {
    /// Name and provider addressing the module, once known.
    fn address(&self) -> Option<(&str, &str)> {
        Some((self.name.as_deref()?, self.module_provider.as_deref()?))
    }

    fn refresh(&mut self, module: RegistryModule) {
        self.module_id = Some(format!(
            "{}/{}/{}",
            module.organization, module.name, module.provider
        ));
        self.version = module.versions.last().cloned();
        self.organization = module.organization;
        self.name = Some(module.name);
        self.module_provider = Some(module.provider);
    }
}

/// Reconciles [`RegistryModuleState`] against the private module registry.
pub struct RegistryModuleReconciler {
    client: Arc<dyn TfeClient>,
}

impl RegistryModuleReconciler {
    /// Create a reconciler using `client`.
    pub fn new(client: Arc<dyn TfeClient>) -> Self {
        Self { client }
    }
}

fn unaddressable(id: &str) -> ProviderError {
    ProviderError::InvalidRequest(format!(
        "registry module {} has no recorded name and provider",
        id
    ))
}

#[async_trait]
impl Reconciler for RegistryModuleReconciler {
    type State = RegistryModuleState;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A module of the private registry")
            .with_attribute(
                "organization",
                Attribute::required_string().with_force_new(),
            )
            .with_attribute(
                "oauth_token",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("OAuth token ID used to access the repository"),
            )
            .with_attribute(
                "repo",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Repository to publish from, as <owner>/<repository>"),
            )
            .with_attribute("module_id", Attribute::computed_string())
            .with_attribute("module_provider", Attribute::computed_string())
            .with_attribute(
                "version",
                Attribute::computed_string().with_description("Latest published version"),
            )
            .with_attribute("name", Attribute::computed_string())
    }

    async fn create(
        &self,
        desired: &RegistryModuleState,
    ) -> Result<Record<RegistryModuleState>, ProviderError> {
        debug!(
            "Publish registry module from {} for organization: {}",
            desired.repo, desired.organization
        );
        let options = RegistryModuleCreateOptions {
            vcs_repo: RegistryModuleVcsRepo {
                identifier: desired.repo.clone(),
                oauth_token_id: desired.oauth_token.clone(),
            },
        };
        let module = self
            .client
            .create_registry_module(&desired.organization, options)
            .await
            .map_err(|err| ProviderError::remote("publishing", KIND, &desired.repo, err))?;

        let id = module.id.clone();
        let mut state = desired.clone();
        state.refresh(module);
        Ok(Record::new(id, state))
    }

    async fn read(
        &self,
        record: &Record<RegistryModuleState>,
    ) -> Result<ReadOutcome<RegistryModuleState>, ProviderError> {
        let (name, provider) = record.state.address().ok_or_else(|| unaddressable(&record.id))?;

        debug!("Read registry module: {}/{}", name, provider);
        let module = match self
            .client
            .read_registry_module(&record.state.organization, name, provider)
            .await
        {
            Ok(module) => module,
            Err(ClientError::NotFound) => {
                debug!("Registry module {} no longer exists", record.id);
                return Ok(ReadOutcome::Gone);
            },
            Err(err) => return Err(ProviderError::remote("reading", KIND, &record.id, err)),
        };

        let mut state = record.state.clone();
        state.refresh(module);
        Ok(ReadOutcome::Found(state))
    }

    async fn delete(&self, record: &Record<RegistryModuleState>) -> Result<(), ProviderError> {
        let (name, provider) = record.state.address().ok_or_else(|| unaddressable(&record.id))?;

        debug!("Delete registry module: {}/{}", name, provider);
        match self
            .client
            .delete_registry_module(&record.state.organization, name, provider)
            .await
        {
            Ok(()) | Err(ClientError::NotFound) => Ok(()),
            Err(err) => Err(ProviderError::remote("deleting", KIND, &record.id, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{Managed, ResourceHandler};
    use crate::testing::MemoryClient;
    use serde_json::json;

    fn setup() -> (Arc<MemoryClient>, Managed<RegistryModuleReconciler>) {
        let client = Arc::new(MemoryClient::new());
        let handler = Managed::new(RegistryModuleReconciler::new(client.clone()));
        (client, handler)
    }

    fn desired() -> serde_json::Value {
        json!({
            "organization": "acme",
            "oauth_token": "ot-123",
            "repo": "acme/terraform-aws-vpc"
        })
    }

    #[tokio::test]
    async fn test_create_fills_computed_fields() {
        let (_client, handler) = setup();

        let state = handler.create(desired()).await.unwrap();
        assert_eq!(state["name"], "vpc");
        assert_eq!(state["module_provider"], "aws");
        assert_eq!(state["module_id"], "acme/vpc/aws");
        assert!(state["version"].is_null());
    }

    #[tokio::test]
    async fn test_read_reports_latest_version() {
        let (client, handler) = setup();
        let state = handler.create(desired()).await.unwrap();

        client.publish_version("acme", "vpc", "aws", "1.0.0");
        client.publish_version("acme", "vpc", "aws", "1.1.0");

        let refreshed = handler.read(state).await.unwrap().unwrap();
        assert_eq!(refreshed["version"], "1.1.0");
    }

    #[tokio::test]
    async fn test_unchanged_update_keeps_computed_fields() {
        let (client, handler) = setup();
        let state = handler.create(desired()).await.unwrap();

        let updated = handler.update(state.clone(), desired()).await.unwrap();
        assert_eq!(updated, state);
        assert_eq!(client.calls("read_registry_module"), 2);
    }

    #[tokio::test]
    async fn test_create_failure_is_reported() {
        let (client, handler) = setup();

        let mut config = desired();
        config["repo"] = json!("acme/not-a-module");
        let err = handler.create(config).await.unwrap_err();
        assert_eq!(err.code(), "remote");
        assert!(err.to_string().contains("acme/not-a-module"));
        assert_eq!(client.calls("read_registry_module"), 0);
    }

    #[tokio::test]
    async fn test_delete_uses_module_provider() {
        let (client, handler) = setup();
        let state = handler.create(desired()).await.unwrap();

        handler.delete(state.clone()).await.unwrap();
        assert!(client.registry_module("acme", "vpc", "aws").is_none());
        assert!(handler.read(state.clone()).await.unwrap().is_none());
        handler.delete(state).await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_failures_are_not_swallowed() {
        let (client, handler) = setup();
        let state = handler.create(desired()).await.unwrap();

        client.fail_on("read_registry_module", ClientError::Unauthorized);
        let err = handler.read(state.clone()).await.unwrap_err();
        assert_eq!(err.code(), "remote");

        client.clear_failures();
        client.fail_on("delete_registry_module", ClientError::Unauthorized);
        let err = handler.delete(state).await.unwrap_err();
        assert_eq!(err.code(), "remote");
        assert!(client.registry_module("acme", "vpc", "aws").is_some());
    }

    #[tokio::test]
    async fn test_read_without_address_is_rejected() {
        let (client, handler) = setup();

        let err = handler
            .read(json!({"id": "mod-1", "organization": "acme", "oauth_token": "ot-123", "repo": "acme/terraform-aws-vpc"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert_eq!(client.total_calls(), 0);
    }
}
