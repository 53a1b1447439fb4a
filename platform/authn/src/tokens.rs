use serde::Deserialize;
use tracing::debug;

use crate::{AuthnError, ProviderConfig};

/// Raw OAuth2 grants against the tenant token endpoint. Used for the app-only
/// (client credentials) tokens the Graph/ARM clients need, and to redeem the
/// refresh token captured at interactive sign-in for on-behalf ARM calls.
#[derive(Clone)]
pub struct TokenBroker {
    http: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenEndpointError {
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

impl TokenBroker {
    pub fn new(http: reqwest::Client, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    /// App-only token for `resource` in the given tenant.
    pub async fn client_credentials(
        &self,
        directory_id: &str,
        resource: &str,
    ) -> Result<TokenSet, AuthnError> {
        let scope = ProviderConfig::resource_scope(resource);
        debug!(%directory_id, %scope, "requesting app-only token");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", scope.as_str()),
        ];
        self.request_token(directory_id, &params).await
    }

    /// Redeem a refresh token for an access token scoped to `resource`.
    pub async fn refresh(
        &self,
        directory_id: &str,
        refresh_token: &str,
        resource: &str,
    ) -> Result<TokenSet, AuthnError> {
        let scope = ProviderConfig::resource_scope(resource);
        debug!(%directory_id, %scope, "redeeming refresh token");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        self.request_token(directory_id, &params).await
    }

    /// Redeem an authorization code outside the interactive OIDC flow (the
    /// admin-consent signup callback, which never establishes a session).
    pub async fn authorization_code(
        &self,
        directory_id: &str,
        code: &str,
        redirect_uri: &str,
        resource: &str,
    ) -> Result<TokenSet, AuthnError> {
        let scope = ProviderConfig::resource_scope(resource);
        debug!(%directory_id, %scope, "redeeming authorization code");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
        ];
        self.request_token(directory_id, &params).await
    }

    async fn request_token(
        &self,
        directory_id: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenSet, AuthnError> {
        let response = self
            .http
            .post(self.config.token_endpoint(directory_id))
            .form(params)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<TokenSet>().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(parse_endpoint_error(&body))
        }
    }
}

/// Read the `tid` claim out of a JWT without verifying it. Only used to learn
/// which tenant consented during signup; the token itself came straight from
/// the token endpoint over TLS and is never trusted for authorization.
pub fn peek_tenant_id(token: &str) -> Option<String> {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("tid")
        .and_then(|tid| tid.as_str())
        .map(|tid| tid.to_string())
}

pub(crate) fn parse_endpoint_error(body: &str) -> AuthnError {
    match serde_json::from_str::<TokenEndpointError>(body) {
        Ok(err) => AuthnError::TokenEndpoint {
            code: err.error,
            description: err.error_description,
        },
        Err(_) => AuthnError::TokenEndpoint {
            code: "unknown".to_string(),
            description: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_set_parses_minimal_response() {
        let set: TokenSet =
            serde_json::from_str(r#"{"access_token":"abc","token_type":"Bearer"}"#).unwrap();
        assert_eq!(set.access_token, "abc");
        assert!(set.refresh_token.is_none());
    }

    #[test]
    fn endpoint_error_is_decoded() {
        let err = parse_endpoint_error(
            r#"{"error":"invalid_client","error_description":"AADSTS7000215"}"#,
        );
        match err {
            AuthnError::TokenEndpoint { code, description } => {
                assert_eq!(code, "invalid_client");
                assert!(description.contains("AADSTS7000215"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn peek_tenant_id_reads_unverified_tid() {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let payload = URL_SAFE_NO_PAD
            .encode(r#"{"tid":"e91d47c4-76f3-4271-a796-2a5bd42d41b7","oid":"x"}"#);
        let token = format!("eyJhbGciOiJub25lIn0.{payload}.sig");
        assert_eq!(
            peek_tenant_id(&token).as_deref(),
            Some("e91d47c4-76f3-4271-a796-2a5bd42d41b7")
        );
        assert_eq!(peek_tenant_id("not-a-jwt"), None);
    }

    #[test]
    fn garbage_body_still_yields_an_error() {
        let err = parse_endpoint_error("<html>oops</html>");
        assert!(matches!(err, AuthnError::TokenEndpoint { .. }));
    }
}
