//! The remote workspace-management API as seen by the reconcilers.
//!
//! [`TfeClient`] is the seam between the provider and a Terraform Enterprise
//! API implementation. Every method takes a typed options struct (or plain
//! identifiers) and returns a typed object or a [`ClientError`]. Absence is
//! always reported as [`ClientError::NotFound`] so callers can tell it apart
//! from a failure by pattern matching.
//!
//! The provider never builds a client itself; one is injected through
//! [`TfeProvider::new`](crate::TfeProvider::new). Tests use
//! [`MemoryClient`](crate::testing::MemoryClient).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a [`TfeClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The requested object does not exist.
    #[error("resource not found")]
    NotFound,

    /// The API token was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The API rejected the request.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status reported by the API.
        status: u16,
        /// Error message reported by the API.
        message: String,
    },

    /// The API answered with a body the client could not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Error returned when parsing one of the enumerated API values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} \"{value}\"")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! api_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            /// Every value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            /// Wire representations of every value, for schema allow-lists.
            pub fn allowed_values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
}

api_enum! {
    /// How strictly a Sentinel policy is enforced.
    EnforcementLevel, "enforcement level" {
        /// Failures are logged only.
        Advisory => "advisory",
        /// Failures block the run; cannot be overridden.
        HardMandatory => "hard-mandatory",
        /// Failures block the run unless overridden.
        SoftMandatory => "soft-mandatory",
    }
}

api_enum! {
    /// Access level granted to a team on a workspace.
    AccessType, "access type" {
        /// Full control of the workspace.
        Admin => "admin",
        /// Read-only access.
        Read => "read",
        /// Queue and apply runs.
        Write => "write",
    }
}

api_enum! {
    /// Category of a workspace variable.
    CategoryType, "variable category" {
        /// Environment variable.
        Env => "env",
        /// Terraform input variable.
        Terraform => "terraform",
    }
}

api_enum! {
    /// Kind of VCS provider behind an OAuth client.
    ServiceProviderType, "service provider" {
        /// Azure DevOps Server.
        AdoServer => "ado_server",
        /// Azure DevOps Services.
        AdoServices => "ado_services",
        /// Bitbucket Cloud.
        BitbucketHosted => "bitbucket_hosted",
        /// Bitbucket Server.
        BitbucketServer => "bitbucket_server",
        /// GitHub.com.
        Github => "github",
        /// GitHub Enterprise.
        GithubEnterprise => "github_enterprise",
        /// GitLab.com.
        GitlabHosted => "gitlab_hosted",
        /// GitLab Community Edition.
        GitlabCommunityEdition => "gitlab_community_edition",
        /// GitLab Enterprise Edition.
        GitlabEnterpriseEdition => "gitlab_enterprise_edition",
    }
}

/// A VCS connection of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    /// Remote identifier.
    pub id: String,
    /// Owning organization name.
    pub organization: String,
    /// Kind of VCS provider.
    pub service_provider: ServiceProviderType,
    /// Base URL of the VCS API.
    pub api_url: String,
    /// Base URL of the VCS web interface.
    pub http_url: String,
    /// URL the VCS provider calls back after authorization.
    pub callback_url: String,
}

/// Options for creating an OAuth client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientCreateOptions {
    /// Kind of VCS provider.
    pub service_provider: ServiceProviderType,
    /// Base URL of the VCS API.
    pub api_url: String,
    /// Base URL of the VCS web interface.
    pub http_url: String,
    /// OAuth application key.
    pub key: String,
    /// OAuth application secret.
    pub secret: String,
}

/// One enforcement entry of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementOptions {
    /// Path of the policy file, `<name>.sentinel`.
    pub path: String,
    /// Enforcement level.
    pub mode: EnforcementLevel,
}

/// A Sentinel policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Remote identifier.
    pub id: String,
    /// Policy name.
    pub name: String,
    /// Owning organization name.
    pub organization: String,
    /// Enforcement entries.
    pub enforce: Vec<EnforcementOptions>,
}

/// Options for creating a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCreateOptions {
    /// Policy name.
    pub name: String,
    /// Enforcement entries.
    pub enforce: Vec<EnforcementOptions>,
}

/// Options for updating a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdateOptions {
    /// Replacement enforcement entries.
    pub enforce: Vec<EnforcementOptions>,
}

/// A team of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Remote identifier.
    pub id: String,
    /// Team name.
    pub name: String,
}

/// A workspace of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Remote identifier.
    pub id: String,
    /// Workspace name.
    pub name: String,
    /// Owning organization name.
    pub organization: String,
}

/// A team access grant on a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAccess {
    /// Remote identifier.
    pub id: String,
    /// Granted access level.
    pub access: AccessType,
    /// The team holding the grant, when the API includes it.
    pub team: Option<Team>,
    /// The workspace the grant applies to, when the API includes it.
    pub workspace: Option<Workspace>,
}

/// Options for adding a team access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAccessAddOptions {
    /// Access level to grant.
    pub access: AccessType,
    /// Identifier of the team.
    pub team_id: String,
    /// Identifier of the workspace.
    pub workspace_id: String,
}

/// A workspace variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Remote identifier.
    pub id: String,
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
    /// Variable category.
    pub category: CategoryType,
    /// Whether the value is parsed as HCL.
    pub hcl: bool,
    /// Whether the value is write-only on the API side.
    pub sensitive: bool,
    /// Identifier of the owning workspace.
    pub workspace_id: String,
}

/// Options for creating a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableCreateOptions {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
    /// Variable category.
    pub category: CategoryType,
    /// Whether the value is parsed as HCL.
    pub hcl: bool,
    /// Whether the value is write-only on the API side.
    pub sensitive: bool,
    /// Identifier of the owning workspace.
    pub workspace_id: String,
}

/// Options for updating a variable. Only `Some` fields are sent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariableUpdateOptions {
    /// New variable name.
    pub key: Option<String>,
    /// New variable value.
    pub value: Option<String>,
    /// New HCL flag.
    pub hcl: Option<bool>,
    /// New sensitive flag.
    pub sensitive: Option<bool>,
}

impl VariableUpdateOptions {
    /// Whether no field would be sent.
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.value.is_none() && self.hcl.is_none() && self.sensitive.is_none()
    }
}

/// Options for listing the variables of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableListOptions {
    /// Organization name.
    pub organization: String,
    /// Workspace name.
    pub workspace: String,
}

/// A private registry module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryModule {
    /// Remote identifier.
    pub id: String,
    /// Module name.
    pub name: String,
    /// Module provider (e.g. `aws`).
    pub provider: String,
    /// Owning organization name.
    pub organization: String,
    /// Published versions, oldest first.
    pub versions: Vec<String>,
}

/// The VCS repository a registry module is published from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryModuleVcsRepo {
    /// Repository identifier, `<owner>/terraform-<provider>-<name>`.
    pub identifier: String,
    /// Identifier of the OAuth token used to access the repository.
    pub oauth_token_id: String,
}

/// Options for publishing a registry module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryModuleCreateOptions {
    /// Source repository.
    pub vcs_repo: RegistryModuleVcsRepo,
}

/// Typed access to the workspace-management API.
///
/// Methods are grouped by object kind. Every method reports a missing target
/// object as [`ClientError::NotFound`].
#[async_trait]
pub trait TfeClient: Send + Sync {
    // =========================================================================
    // OAuth clients
    // =========================================================================

    /// Create a VCS connection for an organization.
    async fn create_oauth_client(
        &self,
        organization: &str,
        options: OAuthClientCreateOptions,
    ) -> Result<OAuthClient, ClientError>;

    /// Read a VCS connection.
    async fn read_oauth_client(&self, id: &str) -> Result<OAuthClient, ClientError>;

    /// Delete a VCS connection.
    async fn delete_oauth_client(&self, id: &str) -> Result<(), ClientError>;

    // =========================================================================
    // Policies
    // =========================================================================

    /// Create a policy in an organization.
    async fn create_policy(
        &self,
        organization: &str,
        options: PolicyCreateOptions,
    ) -> Result<Policy, ClientError>;

    /// Read a policy.
    async fn read_policy(&self, id: &str) -> Result<Policy, ClientError>;

    /// Update a policy's enforcement settings.
    async fn update_policy(
        &self,
        id: &str,
        options: PolicyUpdateOptions,
    ) -> Result<Policy, ClientError>;

    /// Upload the policy source.
    async fn upload_policy(&self, id: &str, content: &[u8]) -> Result<(), ClientError>;

    /// Download the policy source.
    async fn download_policy(&self, id: &str) -> Result<Vec<u8>, ClientError>;

    /// Delete a policy.
    async fn delete_policy(&self, id: &str) -> Result<(), ClientError>;

    // =========================================================================
    // Teams & workspaces
    // =========================================================================

    /// Read a team.
    async fn read_team(&self, id: &str) -> Result<Team, ClientError>;

    /// Read a workspace by organization and workspace name.
    async fn read_workspace(&self, organization: &str, name: &str)
        -> Result<Workspace, ClientError>;

    // =========================================================================
    // Team access
    // =========================================================================

    /// Grant a team access to a workspace.
    async fn add_team_access(&self, options: TeamAccessAddOptions)
        -> Result<TeamAccess, ClientError>;

    /// Read a team access grant.
    async fn read_team_access(&self, id: &str) -> Result<TeamAccess, ClientError>;

    /// Remove a team access grant.
    async fn remove_team_access(&self, id: &str) -> Result<(), ClientError>;

    // =========================================================================
    // Variables
    // =========================================================================

    /// Create a workspace variable.
    async fn create_variable(&self, options: VariableCreateOptions)
        -> Result<Variable, ClientError>;

    /// List the variables of a workspace.
    async fn list_variables(
        &self,
        options: VariableListOptions,
    ) -> Result<Vec<Variable>, ClientError>;

    /// Update a workspace variable.
    async fn update_variable(
        &self,
        id: &str,
        options: VariableUpdateOptions,
    ) -> Result<Variable, ClientError>;

    /// Delete a workspace variable.
    async fn delete_variable(&self, id: &str) -> Result<(), ClientError>;

    // =========================================================================
    // Registry modules
    // =========================================================================

    /// Publish a registry module from a VCS repository.
    async fn create_registry_module(
        &self,
        organization: &str,
        options: RegistryModuleCreateOptions,
    ) -> Result<RegistryModule, ClientError>;

    /// Read a registry module.
    async fn read_registry_module(
        &self,
        organization: &str,
        name: &str,
        provider: &str,
    ) -> Result<RegistryModule, ClientError>;

    /// Delete a registry module.
    async fn delete_registry_module(
        &self,
        organization: &str,
        name: &str,
        provider: &str,
    ) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_wire_values() {
        assert_eq!(EnforcementLevel::HardMandatory.as_str(), "hard-mandatory");
        assert_eq!(
            EnforcementLevel::allowed_values(),
            vec!["advisory", "hard-mandatory", "soft-mandatory"]
        );
        assert_eq!(AccessType::allowed_values(), vec!["admin", "read", "write"]);
        assert_eq!(CategoryType::Env.to_string(), "env");
        assert_eq!(ServiceProviderType::ALL.len(), 9);
    }

    #[test]
    fn test_enum_parse() {
        assert_eq!(
            "soft-mandatory".parse::<EnforcementLevel>(),
            Ok(EnforcementLevel::SoftMandatory)
        );
        assert_eq!("github".parse::<ServiceProviderType>(), Ok(ServiceProviderType::Github));

        let err = "owner".parse::<AccessType>().unwrap_err();
        assert_eq!(err.to_string(), "invalid access type \"owner\"");
    }

    #[test]
    fn test_enum_serde_matches_wire() {
        let json = serde_json::to_value(CategoryType::Terraform).unwrap();
        assert_eq!(json, serde_json::json!("terraform"));

        let parsed: ServiceProviderType =
            serde_json::from_value(serde_json::json!("gitlab_enterprise_edition")).unwrap();
        assert_eq!(parsed, ServiceProviderType::GitlabEnterpriseEdition);
    }

    #[test]
    fn test_variable_update_options_is_empty() {
        assert!(VariableUpdateOptions::default().is_empty());
        let options = VariableUpdateOptions {
            hcl: Some(true),
            ..Default::default()
        };
        assert!(!options.is_empty());
    }

    #[test]
    fn test_client_error_display() {
        assert_eq!(ClientError::NotFound.to_string(), "resource not found");
        let err = ClientError::Api {
            status: 422,
            message: "invalid attribute".to_string(),
        };
        assert_eq!(err.to_string(), "API error (422): invalid attribute");
    }
}
