//! `tfe_team_access`: a team's access grant on a workspace.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{AccessType, ClientError, TeamAccess, TeamAccessAddOptions, TfeClient};
use crate::error::ProviderError;
use crate::id::WorkspaceId;
use crate::reconcile::{ReadOutcome, Reconciler, Record};
use crate::resources::resolve_workspace;
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const TYPE_NAME: &str = "tfe_team_access";

const KIND: &str = "team access";

/// Desired state of a team access grant. Every field forces replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAccessState {
    /// Granted access level.
    pub access: AccessType,
    /// Identifier of the team.
    pub team_id: String,
    /// Workspace the grant applies to, `<organization>/<workspace>`.
    pub workspace_id: String,
}

/// Reconciles [`TeamAccessState`] against workspace team access grants.
pub struct TeamAccessReconciler {
    client: Arc<dyn TfeClient>,
}

impl TeamAccessReconciler {
    /// Create a reconciler using `client`.
    pub fn new(client: Arc<dyn TfeClient>) -> Self {
        Self { client }
    }

    async fn fetch(&self, id: &str) -> Result<ReadOutcome<TeamAccess>, ProviderError> {
        match self.client.read_team_access(id).await {
            Ok(access) => Ok(ReadOutcome::Found(access)),
            Err(ClientError::NotFound) => Ok(ReadOutcome::Gone),
            Err(err) => Err(ProviderError::remote("reading", KIND, id, err)),
        }
    }
}

#[async_trait]
impl Reconciler for TeamAccessReconciler {
    type State = TeamAccessState;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Access of a team to a workspace")
            .with_attribute(
                "access",
                Attribute::required_string()
                    .with_force_new()
                    .with_allowed_values(AccessType::allowed_values())
                    .with_description("Access level to grant"),
            )
            .with_attribute(
                "team_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("ID of the team"),
            )
            .with_attribute(
                "workspace_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Workspace to grant access to, as <organization>/<workspace>"),
            )
    }

    fn validate(&self, desired: &TeamAccessState) -> Result<(), ProviderError> {
        WorkspaceId::unpack(&desired.workspace_id).map(|_| ())
    }

    async fn create(
        &self,
        desired: &TeamAccessState,
    ) -> Result<Record<TeamAccessState>, ProviderError> {
        let workspace_id = WorkspaceId::unpack(&desired.workspace_id)?;

        let team = self
            .client
            .read_team(&desired.team_id)
            .await
            .map_err(|err| match err {
                ClientError::NotFound => ProviderError::DependencyNotFound {
                    kind: "team",
                    name: desired.team_id.clone(),
                },
                err => ProviderError::remote("retrieving", "team", &desired.team_id, err),
            })?;
        let workspace = resolve_workspace(self.client.as_ref(), &workspace_id).await?;

        debug!(
            "Give team {} {} access to workspace: {}",
            team.name, desired.access, workspace.name
        );
        let options = TeamAccessAddOptions {
            access: desired.access,
            team_id: team.id,
            workspace_id: workspace.id,
        };
        let access = self.client.add_team_access(options).await.map_err(|err| {
            ProviderError::remote(
                "giving",
                KIND,
                format!("to team {} on {}", team.name, workspace_id),
                err,
            )
        })?;

        Ok(Record::new(access.id, desired.clone()))
    }

    async fn read(
        &self,
        record: &Record<TeamAccessState>,
    ) -> Result<ReadOutcome<TeamAccessState>, ProviderError> {
        debug!("Read configuration of team access: {}", record.id);
        let access = match self.fetch(&record.id).await? {
            ReadOutcome::Found(access) => access,
            ReadOutcome::Gone => {
                debug!("Team access {} no longer exists", record.id);
                return Ok(ReadOutcome::Gone);
            },
        };

        let mut state = record.state.clone();
        state.access = access.access;
        state.team_id = access.team.map(|team| team.id).unwrap_or_default();
        if let Some(workspace) = &access.workspace {
            state.workspace_id = WorkspaceId::from(workspace).pack();
        }
        Ok(ReadOutcome::Found(state))
    }

    async fn delete(&self, record: &Record<TeamAccessState>) -> Result<(), ProviderError> {
        debug!("Delete team access: {}", record.id);
        match self.client.remove_team_access(&record.id).await {
            Ok(()) | Err(ClientError::NotFound) => Ok(()),
            Err(err) => Err(ProviderError::remote("deleting", KIND, &record.id, err)),
        }
    }

    async fn import(
        &self,
        id: &str,
    ) -> Result<ReadOutcome<Record<TeamAccessState>>, ProviderError> {
        debug!("Import team access: {}", id);
        let access = match self.fetch(id).await? {
            ReadOutcome::Found(access) => access,
            ReadOutcome::Gone => return Ok(ReadOutcome::Gone),
        };

        let Some(workspace) = &access.workspace else {
            return Err(ProviderError::InvalidRequest(format!(
                "team access {} does not report its workspace",
                id
            )));
        };
        let state = TeamAccessState {
            access: access.access,
            team_id: access.team.map(|team| team.id).unwrap_or_default(),
            workspace_id: WorkspaceId::from(workspace).pack(),
        };
        Ok(ReadOutcome::Found(Record::new(access.id, state)))
    }
}
