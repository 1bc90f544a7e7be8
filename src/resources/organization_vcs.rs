//! `tfe_organization_vcs`: a VCS connection (OAuth client) of an organization.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{ClientError, OAuthClientCreateOptions, ServiceProviderType, TfeClient};
use crate::error::ProviderError;
use crate::reconcile::{ReadOutcome, Reconciler, Record};
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const TYPE_NAME: &str = "tfe_organization_vcs";

const KIND: &str = "VCS connection";

/// Desired state of a VCS connection. Every configurable field forces
/// replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationVcsState {
    /// Owning organization name.
    pub organization: String,
    /// OAuth application key.
    pub github_key: String,
    /// OAuth application secret. Write-only.
    pub github_secret: String,
    /// Kind of VCS provider.
    pub service_provider: ServiceProviderType,
    /// Base URL of the VCS web interface.
    pub http_url: String,
    /// Base URL of the VCS API.
    pub api_url: String,
    /// Identifier of the OAuth client.
    pub vcs_id: Option<String>,
    /// URL the VCS provider calls back after authorization.
    pub callback_url: Option<String>,
}

/// Reconciles [`OrganizationVcsState`] against OAuth clients.
pub struct OrganizationVcsReconciler {
    client: Arc<dyn TfeClient>,
}

impl OrganizationVcsReconciler {
    /// Create a reconciler using `client`.
    pub fn new(client: Arc<dyn TfeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Reconciler for OrganizationVcsReconciler {
    type State = OrganizationVcsState;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A VCS connection of an organization")
            .with_attribute(
                "organization",
                Attribute::required_string().with_force_new(),
            )
            .with_attribute(
                "github_key",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("OAuth application key"),
            )
            .with_attribute(
                "github_secret",
                Attribute::required_string()
                    .with_force_new()
                    .sensitive()
                    .with_description("OAuth application secret"),
            )
            .with_attribute(
                "service_provider",
                Attribute::required_string()
                    .with_force_new()
                    .with_allowed_values(ServiceProviderType::allowed_values()),
            )
            .with_attribute("http_url", Attribute::required_string().with_force_new())
            .with_attribute("api_url", Attribute::required_string().with_force_new())
            .with_attribute("vcs_id", Attribute::computed_string())
            .with_attribute("callback_url", Attribute::computed_string())
    }

    async fn create(
        &self,
        desired: &OrganizationVcsState,
    ) -> Result<Record<OrganizationVcsState>, ProviderError> {
        debug!(
            "Create new {} VCS connection for organization: {}",
            desired.service_provider, desired.organization
        );
        let options = OAuthClientCreateOptions {
            service_provider: desired.service_provider,
            api_url: desired.api_url.clone(),
            http_url: desired.http_url.clone(),
            key: desired.github_key.clone(),
            secret: desired.github_secret.clone(),
        };
        let oauth_client = self
            .client
            .create_oauth_client(&desired.organization, options)
            .await
            .map_err(|err| {
                ProviderError::remote("creating", KIND, &desired.organization, err)
            })?;

        Ok(Record::new(oauth_client.id, desired.clone()))
    }

    async fn read(
        &self,
        record: &Record<OrganizationVcsState>,
    ) -> Result<ReadOutcome<OrganizationVcsState>, ProviderError> {
        debug!("Read configuration of VCS connection: {}", record.id);
        let oauth_client = match self.client.read_oauth_client(&record.id).await {
            Ok(oauth_client) => oauth_client,
            Err(ClientError::NotFound) => {
                debug!("VCS connection {} no longer exists", record.id);
                return Ok(ReadOutcome::Gone);
            },
            Err(err) => return Err(ProviderError::remote("reading", KIND, &record.id, err)),
        };

        let mut state = record.state.clone();
        state.organization = oauth_client.organization;
        state.service_provider = oauth_client.service_provider;
        state.http_url = oauth_client.http_url;
        state.api_url = oauth_client.api_url;
        state.vcs_id = Some(oauth_client.id);
        state.callback_url = Some(oauth_client.callback_url);
        Ok(ReadOutcome::Found(state))
    }

    async fn delete(&self, record: &Record<OrganizationVcsState>) -> Result<(), ProviderError> {
        debug!("Delete VCS connection: {}", record.id);
        match self.client.delete_oauth_client(&record.id).await {
            Ok(()) | Err(ClientError::NotFound) => Ok(()),
            Err(err) => Err(ProviderError::remote("deleting", KIND, &record.id, err)),
        }
    }
}
