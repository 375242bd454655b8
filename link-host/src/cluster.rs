//! Cluster definitions.

use link_types::{ClusterId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// A cluster the owning process can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Stable identity.
    pub id: ClusterId,
    /// Human-readable name.
    pub name: String,
    /// API server address handed to the connector.
    pub endpoint: String,
    /// Workspace the cluster is grouped under.
    #[serde(default)]
    pub workspace: WorkspaceId,
}

impl Cluster {
    /// A cluster in the default workspace.
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: ClusterId::new(id),
            name: name.into(),
            endpoint: endpoint.into(),
            workspace: WorkspaceId::default(),
        }
    }

    /// Place the cluster in `workspace`.
    pub fn in_workspace(mut self, workspace: WorkspaceId) -> Self {
        self.workspace = workspace;
        self
    }
}
