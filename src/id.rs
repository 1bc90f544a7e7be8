//! Composite identifiers.
//!
//! A workspace is addressed by its organization and workspace names, packed
//! into one string as `<organization>/<workspace>`.

use std::fmt;
use std::str::FromStr;

use crate::client::Workspace;
use crate::error::ProviderError;

/// Separator between the organization and the workspace name.
pub const SEPARATOR: char = '/';

/// A workspace reference packed as `<organization>/<workspace>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceId {
    /// Organization name.
    pub organization: String,
    /// Workspace name.
    pub name: String,
}

impl WorkspaceId {
    /// Create a workspace reference.
    pub fn new(organization: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            name: name.into(),
        }
    }

    /// Pack into the `<organization>/<workspace>` form.
    pub fn pack(&self) -> String {
        self.to_string()
    }

    /// Unpack from the `<organization>/<workspace>` form.
    pub fn unpack(id: &str) -> Result<Self, ProviderError> {
        id.parse()
    }
}

impl From<&Workspace> for WorkspaceId {
    fn from(workspace: &Workspace) -> Self {
        Self::new(&workspace.organization, &workspace.name)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.organization, SEPARATOR, self.name)
    }
}

impl FromStr for WorkspaceId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(SEPARATOR) {
            Some((organization, name))
                if !organization.is_empty() && !name.is_empty() && !name.contains(SEPARATOR) =>
            {
                Ok(Self::new(organization, name))
            },
            _ => Err(ProviderError::Validation(format!(
                "invalid workspace ID \"{}\": expected <organization>{}<workspace>",
                s, SEPARATOR
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack() {
        let id = WorkspaceId::new("my-org", "my-workspace");
        assert_eq!(id.pack(), "my-org/my-workspace");
    }

    #[test]
    fn test_round_trip() {
        let pairs = [
            ("my-org", "my-workspace"),
            ("a", "b"),
            ("org with spaces", "ws|pipe"),
            ("hashicorp", "terraform-aws-vpc"),
        ];
        for (organization, name) in pairs {
            let packed = WorkspaceId::new(organization, name).pack();
            let unpacked = WorkspaceId::unpack(&packed).unwrap();
            assert_eq!(
                (unpacked.organization.as_str(), unpacked.name.as_str()),
                (organization, name)
            );
        }
    }

    #[test]
    fn test_unpack_rejects_malformed() {
        for bad in ["", "no-separator", "/ws", "org/", "org/ws/extra"] {
            let err = WorkspaceId::unpack(bad).unwrap_err();
            assert!(
                matches!(err, ProviderError::Validation(_)),
                "expected validation error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_from_workspace() {
        let workspace = Workspace {
            id: "ws-1".to_string(),
            name: "prod".to_string(),
            organization: "acme".to_string(),
        };
        assert_eq!(WorkspaceId::from(&workspace).pack(), "acme/prod");
    }
}
