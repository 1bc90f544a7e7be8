//! `tfe_variable`: a Terraform or environment variable of a workspace.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::client::{
    CategoryType, ClientError, TfeClient, VariableCreateOptions, VariableListOptions,
    VariableUpdateOptions,
};
use crate::error::ProviderError;
use crate::id::WorkspaceId;
use crate::reconcile::{ChangeSet, ReadOutcome, Reconciler, Record};
use crate::resources::resolve_workspace;
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const TYPE_NAME: &str = "tfe_variable";

const KIND: &str = "variable";

/// Desired state of a workspace variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableState {
    /// Variable name.
    pub key: String,
    /// Variable value. Write-only.
    pub value: String,
    /// Terraform input or environment variable.
    pub category: CategoryType,
    /// Whether the value is parsed as HCL.
    pub hcl: bool,
    /// Whether the API hides the value once written.
    pub sensitive: bool,
    /// Owning workspace, `<organization>/<workspace>`.
    pub workspace_id: String,
}

/// Reconciles [`VariableState`] against workspace variables.
pub struct VariableReconciler {
    client: Arc<dyn TfeClient>,
}

impl VariableReconciler {
    /// Create a reconciler using `client`.
    pub fn new(client: Arc<dyn TfeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Reconciler for VariableReconciler {
    type State = VariableState;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A variable of a workspace")
            .with_attribute(
                "key",
                Attribute::required_string().with_description("Name of the variable"),
            )
            .with_attribute(
                "value",
                Attribute::required_string()
                    .sensitive()
                    .with_description("Value of the variable"),
            )
            .with_attribute(
                "category",
                Attribute::required_string()
                    .with_force_new()
                    .with_allowed_values(CategoryType::allowed_values())
                    .with_description("Whether this is a Terraform or environment variable"),
            )
            .with_attribute(
                "hcl",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_description("Whether to evaluate the value as HCL"),
            )
            .with_attribute(
                "sensitive",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_description("Whether the value is write-only"),
            )
            .with_attribute(
                "workspace_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Workspace that owns the variable, as <organization>/<workspace>"),
            )
    }

    fn validate(&self, desired: &VariableState) -> Result<(), ProviderError> {
        WorkspaceId::unpack(&desired.workspace_id).map(|_| ())
    }

    async fn create(&self, desired: &VariableState) -> Result<Record<VariableState>, ProviderError> {
        let workspace_id = WorkspaceId::unpack(&desired.workspace_id)?;
        let workspace = resolve_workspace(self.client.as_ref(), &workspace_id).await?;

        debug!("Create {} variable: {}", desired.category, desired.key);
        let options = VariableCreateOptions {
            key: desired.key.clone(),
            value: desired.value.clone(),
            category: desired.category,
            hcl: desired.hcl,
            sensitive: desired.sensitive,
            workspace_id: workspace.id,
        };
        let variable = self
            .client
            .create_variable(options)
            .await
            .map_err(|err| ProviderError::remote("creating", KIND, &desired.key, err))?;

        Ok(Record::new(variable.id, desired.clone()))
    }

    async fn read(
        &self,
        record: &Record<VariableState>,
    ) -> Result<ReadOutcome<VariableState>, ProviderError> {
        let workspace_id = WorkspaceId::unpack(&record.state.workspace_id)?;

        debug!("Read variables of workspace: {}", workspace_id);
        let options = VariableListOptions {
            organization: workspace_id.organization.clone(),
            workspace: workspace_id.name.clone(),
        };
        let variables = match self.client.list_variables(options).await {
            Ok(variables) => variables,
            Err(ClientError::NotFound) => {
                debug!("Workspace {} no longer exists", workspace_id);
                return Ok(ReadOutcome::Gone);
            },
            Err(err) => {
                return Err(ProviderError::remote("reading", KIND, &record.id, err));
            },
        };

        let Some(variable) = variables.into_iter().find(|v| v.id == record.id) else {
            debug!("Variable {} no longer exists", record.id);
            return Ok(ReadOutcome::Gone);
        };

        // The value is write-only and stays as recorded.
        let mut state = record.state.clone();
        state.key = variable.key;
        state.category = variable.category;
        state.hcl = variable.hcl;
        state.sensitive = variable.sensitive;
        Ok(ReadOutcome::Found(state))
    }

    async fn update(
        &self,
        record: &Record<VariableState>,
        desired: &VariableState,
        changes: &ChangeSet,
    ) -> Result<(), ProviderError> {
        let options = VariableUpdateOptions {
            key: changes.contains("key").then(|| desired.key.clone()),
            value: changes.contains("value").then(|| desired.value.clone()),
            hcl: changes.contains("hcl").then_some(desired.hcl),
            sensitive: changes.contains("sensitive").then_some(desired.sensitive),
        };

        debug!("Update variable: {}", record.id);
        self.client
            .update_variable(&record.id, options)
            .await
            .map_err(|err| ProviderError::remote_or_not_found("updating", KIND, &record.id, err))?;
        Ok(())
    }

    async fn delete(&self, record: &Record<VariableState>) -> Result<(), ProviderError> {
        debug!("Delete variable: {}", record.id);
        match self.client.delete_variable(&record.id).await {
            Ok(()) | Err(ClientError::NotFound) => Ok(()),
            Err(err) => Err(ProviderError::remote("deleting", KIND, &record.id, err)),
        }
    }
}
