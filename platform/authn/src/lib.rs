//! Directory sign-in against Azure AD: the interactive OIDC flow used by the
//! web routes, raw token grants (client credentials, refresh token) for the
//! Graph/ARM clients, and the device-code flow used by the installer.

mod device;
mod oidc;
mod tokens;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use device::{DeviceCodeResponse, start_device_login, wait_for_device_token};
pub use oidc::{AuthorizeUrl, DirectoryClaims, DirectoryUser, OidcProvider, SignIn};
pub use tokens::{TokenBroker, TokenSet, peek_tenant_id};

#[derive(Debug, Error)]
pub enum AuthnError {
    #[error("provider discovery failed: {0}")]
    Discovery(String),
    #[error("code exchange failed: {0}")]
    Exchange(String),
    #[error("token response carried no id token")]
    MissingIdToken,
    #[error("id token is missing the {0} claim")]
    MissingClaim(&'static str),
    #[error("issuer {0} is not trusted")]
    UntrustedIssuer(String),
    #[error("token endpoint returned {code}: {description}")]
    TokenEndpoint { code: String, description: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Static client registration shared by every tenant the app talks to.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base login host, e.g. `https://login.microsoftonline.com`.
    pub login_base: String,
    pub redirect_url: String,
    /// Issuers must start with this prefix to be accepted at sign-in.
    pub trusted_issuer_prefix: String,
}

impl ProviderConfig {
    /// OIDC issuer for a tenant.
    pub fn authority(&self, directory_id: &str) -> String {
        format!("{}/{}/v2.0", self.login_base.trim_end_matches('/'), directory_id)
    }

    pub fn token_endpoint(&self, directory_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base.trim_end_matches('/'),
            directory_id
        )
    }

    pub fn devicecode_endpoint(&self, directory_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/devicecode",
            self.login_base.trim_end_matches('/'),
            directory_id
        )
    }

    /// v2 default scope for a v1-style resource identifier.
    pub fn resource_scope(resource: &str) -> String {
        format!("{}/.default", resource.trim_end_matches('/'))
    }
}

/// Everything the callback needs to finish a login, round-tripped through an
/// encrypted cookie while the user is away at the identity provider.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TempLoginState {
    pub csrf: String,
    pub nonce: String,
    pub pkce_verifier: String,
    pub directory_id: String,
    pub return_to: Option<String>,
}

impl TempLoginState {
    pub fn new(auth: &AuthorizeUrl, directory_id: &str, return_to: Option<String>) -> Self {
        Self {
            csrf: auth.csrf.clone(),
            nonce: auth.nonce.clone(),
            pkce_verifier: auth.pkce_verifier.clone(),
            directory_id: directory_id.to_string(),
            return_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_is_tenant_scoped() {
        let config = ProviderConfig {
            client_id: "app".into(),
            client_secret: "secret".into(),
            login_base: "https://login.microsoftonline.com/".into(),
            redirect_url: "https://localhost/auth/callback".into(),
            trusted_issuer_prefix: "https://login.microsoftonline.com/".into(),
        };
        assert_eq!(
            config.authority("e91d47c4-76f3-4271-a796-2a5bd42d41b7"),
            "https://login.microsoftonline.com/e91d47c4-76f3-4271-a796-2a5bd42d41b7/v2.0"
        );
        assert_eq!(
            config.token_endpoint("common"),
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
    }

    #[test]
    fn resource_scope_strips_trailing_slash() {
        assert_eq!(
            ProviderConfig::resource_scope("https://management.azure.com/"),
            "https://management.azure.com/.default"
        );
    }
}
