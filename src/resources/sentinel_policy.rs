//! `tfe_sentinel_policy`: a Sentinel policy of an organization.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::client::{
    ClientError, EnforcementLevel, EnforcementOptions, Policy, PolicyCreateOptions,
    PolicyUpdateOptions, TfeClient,
};
use crate::error::ProviderError;
use crate::reconcile::{ChangeSet, ReadOutcome, Reconciler, Record};
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const TYPE_NAME: &str = "tfe_sentinel_policy";

const KIND: &str = "sentinel policy";

/// Desired state of a Sentinel policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelPolicyState {
    /// Policy name, unique within the organization.
    pub name: String,
    /// Owning organization name.
    pub organization: String,
    /// Policy source text.
    pub policy: String,
    /// Enforcement level.
    pub enforce_mode: EnforcementLevel,
}

/// Reconciles [`SentinelPolicyState`] against organization policies.
pub struct SentinelPolicyReconciler {
    client: Arc<dyn TfeClient>,
}

impl SentinelPolicyReconciler {
    /// Create a reconciler using `client`.
    pub fn new(client: Arc<dyn TfeClient>) -> Self {
        Self { client }
    }

    /// Fetch the policy and its source text.
    async fn fetch(&self, id: &str) -> Result<ReadOutcome<(Policy, String)>, ProviderError> {
        let policy = match self.client.read_policy(id).await {
            Ok(policy) => policy,
            Err(ClientError::NotFound) => return Ok(ReadOutcome::Gone),
            Err(err) => return Err(ProviderError::remote("reading", KIND, id, err)),
        };
        let content = match self.client.download_policy(id).await {
            Ok(content) => content,
            Err(ClientError::NotFound) => return Ok(ReadOutcome::Gone),
            Err(err) => return Err(ProviderError::remote("downloading", KIND, id, err)),
        };
        let content = String::from_utf8(content).map_err(|err| {
            ProviderError::remote(
                "downloading",
                KIND,
                id,
                ClientError::InvalidResponse(format!("policy source is not UTF-8: {}", err)),
            )
        })?;
        Ok(ReadOutcome::Found((policy, content)))
    }
}

/// The single enforcement entry the provider manages for a policy.
fn enforcement(name: &str, mode: EnforcementLevel) -> Vec<EnforcementOptions> {
    vec![EnforcementOptions {
        path: format!("{}.sentinel", name),
        mode,
    }]
}

/// Enforcement level of a policy, if it has exactly one entry.
fn single_mode(policy: &Policy) -> Option<EnforcementLevel> {
    match policy.enforce.as_slice() {
        [entry] => Some(entry.mode),
        _ => None,
    }
}

#[async_trait]
impl Reconciler for SentinelPolicyReconciler {
    type State = SentinelPolicyState;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A Sentinel policy of an organization")
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Name of the policy"),
            )
            .with_attribute(
                "organization",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Name of the organization"),
            )
            .with_attribute(
                "policy",
                Attribute::required_string().with_description("Sentinel source of the policy"),
            )
            .with_attribute(
                "enforce_mode",
                Attribute::optional_string()
                    .with_default(json!(EnforcementLevel::SoftMandatory.as_str()))
                    .with_allowed_values(EnforcementLevel::allowed_values())
                    .with_description("How strictly the policy is enforced"),
            )
    }

    async fn create(
        &self,
        desired: &SentinelPolicyState,
    ) -> Result<Record<SentinelPolicyState>, ProviderError> {
        debug!(
            "Create sentinel policy {} for organization: {}",
            desired.name, desired.organization
        );
        let options = PolicyCreateOptions {
            name: desired.name.clone(),
            enforce: enforcement(&desired.name, desired.enforce_mode),
        };
        let policy = self
            .client
            .create_policy(&desired.organization, options)
            .await
            .map_err(|err| ProviderError::remote("creating", KIND, &desired.name, err))?;

        debug!("Upload sentinel policy {}", policy.id);
        self.client
            .upload_policy(&policy.id, desired.policy.as_bytes())
            .await
            .map_err(|err| ProviderError::remote("uploading", KIND, &policy.id, err))?;

        Ok(Record::new(policy.id, desired.clone()))
    }

    async fn read(
        &self,
        record: &Record<SentinelPolicyState>,
    ) -> Result<ReadOutcome<SentinelPolicyState>, ProviderError> {
        debug!("Read sentinel policy: {}", record.id);
        let (policy, content) = match self.fetch(&record.id).await? {
            ReadOutcome::Found(found) => found,
            ReadOutcome::Gone => {
                debug!("Sentinel policy {} no longer exists", record.id);
                return Ok(ReadOutcome::Gone);
            },
        };

        let mut state = record.state.clone();
        if let Some(mode) = single_mode(&policy) {
            state.enforce_mode = mode;
        }
        state.name = policy.name;
        state.organization = policy.organization;
        state.policy = content;
        Ok(ReadOutcome::Found(state))
    }

    async fn update(
        &self,
        record: &Record<SentinelPolicyState>,
        desired: &SentinelPolicyState,
        changes: &ChangeSet,
    ) -> Result<(), ProviderError> {
        if changes.contains("enforce_mode") {
            debug!("Update enforcement of sentinel policy: {}", record.id);
            let options = PolicyUpdateOptions {
                enforce: enforcement(&desired.name, desired.enforce_mode),
            };
            self.client
                .update_policy(&record.id, options)
                .await
                .map_err(|err| ProviderError::remote_or_not_found("updating", KIND, &record.id, err))?;
        }

        if changes.contains("policy") {
            debug!("Upload new content of sentinel policy: {}", record.id);
            self.client
                .upload_policy(&record.id, desired.policy.as_bytes())
                .await
                .map_err(|err| ProviderError::remote_or_not_found("uploading", KIND, &record.id, err))?;
        }

        Ok(())
    }

    async fn delete(&self, record: &Record<SentinelPolicyState>) -> Result<(), ProviderError> {
        debug!("Delete sentinel policy: {}", record.id);
        match self.client.delete_policy(&record.id).await {
            Ok(()) | Err(ClientError::NotFound) => Ok(()),
            Err(err) => Err(ProviderError::remote("deleting", KIND, &record.id, err)),
        }
    }

    async fn import(
        &self,
        id: &str,
    ) -> Result<ReadOutcome<Record<SentinelPolicyState>>, ProviderError> {
        debug!("Import sentinel policy: {}", id);
        let (policy, content) = match self.fetch(id).await? {
            ReadOutcome::Found(found) => found,
            ReadOutcome::Gone => return Ok(ReadOutcome::Gone),
        };

        let state = SentinelPolicyState {
            enforce_mode: single_mode(&policy).unwrap_or(EnforcementLevel::SoftMandatory),
            name: policy.name,
            organization: policy.organization,
            policy: content,
        };
        Ok(ReadOutcome::Found(Record::new(policy.id, state)))
    }
}
