//! Thin, typed clients for the two Azure control planes the app talks to:
//! the AAD Graph API (directory objects) and Azure Resource Manager
//! (permissions and role assignments). Every call is a single bearer-token
//! request/response round trip; there is no retry or caching layer.

pub mod arm;
pub mod graph;
pub mod permissions;

use serde::Deserialize;
use thiserror::Error;

pub use arm::{
    ArmApiVersions, ArmClient, RoleAssignment, RoleDefinition, SubscriptionRecord,
    tenant_from_www_authenticate,
};
pub use graph::{
    ApplicationRequest, DirectoryObject, DirectoryUserRecord, GraphClient, KeyCredential,
    RequiredResourceAccess, ResourceAccess, ServicePrincipal,
};
pub use permissions::{MANAGE_ACCESS_ACTION, PermissionSet, allows_action, allows_read};

pub type AzureResult<T> = Result<T, AzureApiError>;

#[derive(Debug, Error)]
pub enum AzureApiError {
    #[error("azure endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AzureApiError {
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::Status { status, body }
    }
}

/// Both control planes wrap list results in `{"value": [...]}`.
#[derive(Debug, Deserialize)]
pub struct ValueList<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}
