use openidconnect::core::{
    CoreAuthDisplay, CoreAuthPrompt, CoreErrorResponseType, CoreGenderClaim, CoreJsonWebKey,
    CoreJsonWebKeyType, CoreJsonWebKeyUse, CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm, CoreProviderMetadata, CoreResponseType, CoreRevocableToken,
    CoreRevocationErrorResponse, CoreTokenIntrospectionResponse, CoreTokenType,
};
use openidconnect::reqwest::async_http_client;
use openidconnect::{
    AdditionalClaims, AuthenticationFlow, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EmptyExtraTokenFields, IdTokenFields, IssuerUrl, Nonce, OAuth2TokenResponse,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, StandardErrorResponse,
    StandardTokenResponse, TokenResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AuthnError, ProviderConfig};

/// Azure AD claims beyond the OIDC standard set.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DirectoryClaims {
    #[serde(default)]
    pub oid: Option<Uuid>,
    #[serde(default)]
    pub tid: Option<Uuid>,
    #[serde(default)]
    pub upn: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    /// Present when the tenant has too many groups to inline in the token;
    /// the full list must then come from a Graph getMemberGroups call.
    #[serde(default, rename = "_claim_names")]
    pub claim_names: Option<serde_json::Value>,
}

impl AdditionalClaims for DirectoryClaims {}

impl DirectoryClaims {
    pub fn has_group_overage(&self) -> bool {
        self.claim_names
            .as_ref()
            .and_then(|names| names.get("groups"))
            .is_some()
    }
}

type DirectoryTokenFields = IdTokenFields<
    DirectoryClaims,
    EmptyExtraTokenFields,
    CoreGenderClaim,
    CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm,
    CoreJsonWebKeyType,
>;

type DirectoryTokenResponse = StandardTokenResponse<DirectoryTokenFields, CoreTokenType>;

type DirectoryClient = openidconnect::Client<
    DirectoryClaims,
    CoreAuthDisplay,
    CoreGenderClaim,
    CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm,
    CoreJsonWebKeyType,
    CoreJsonWebKeyUse,
    CoreJsonWebKey,
    CoreAuthPrompt,
    StandardErrorResponse<CoreErrorResponseType>,
    DirectoryTokenResponse,
    CoreTokenType,
    CoreTokenIntrospectionResponse,
    CoreRevocableToken,
    CoreRevocationErrorResponse,
>;

/// A ready authorize redirect plus the secrets the callback will need.
#[derive(Clone, Debug)]
pub struct AuthorizeUrl {
    pub url: url::Url,
    pub csrf: String,
    pub nonce: String,
    pub pkce_verifier: String,
}

/// The signed-in user as established by a verified id token.
#[derive(Clone, Debug)]
pub struct DirectoryUser {
    pub object_id: Uuid,
    pub tenant_id: Uuid,
    pub unique_name: String,
    pub display_name: Option<String>,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
    pub groups_overage: bool,
}

/// Outcome of a completed code exchange.
#[derive(Clone, Debug)]
pub struct SignIn {
    pub user: DirectoryUser,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Tenant-scoped OIDC client, discovered per request. The original system
/// re-resolves the authority on every challenge as well; there is no
/// discovery cache by design of the source material.
pub struct OidcProvider {
    client: DirectoryClient,
    trusted_issuer_prefix: String,
}

impl OidcProvider {
    pub async fn discover(
        config: &ProviderConfig,
        directory_id: &str,
    ) -> Result<Self, AuthnError> {
        let issuer = IssuerUrl::new(config.authority(directory_id))
            .map_err(|err| AuthnError::Discovery(err.to_string()))?;
        let metadata = CoreProviderMetadata::discover_async(issuer, async_http_client)
            .await
            .map_err(|err| AuthnError::Discovery(err.to_string()))?;
        let redirect = RedirectUrl::new(config.redirect_url.clone())
            .map_err(|err| AuthnError::Discovery(err.to_string()))?;
        let client = DirectoryClient::from_provider_metadata(
            metadata,
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
        )
        .set_redirect_uri(redirect);
        Ok(Self {
            client,
            trusted_issuer_prefix: config.trusted_issuer_prefix.clone(),
        })
    }

    /// Build the authorize redirect. `extra_scopes` carries the resource
    /// audience (e.g. ARM user_impersonation) on top of the OIDC basics.
    pub fn authorize(&self, extra_scopes: &[String], prompt: &str) -> AuthorizeUrl {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = self.client.authorize_url(
            AuthenticationFlow::<CoreResponseType>::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        );
        for scope in ["profile", "email", "offline_access"] {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        for scope in extra_scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, csrf, nonce) = request
            .add_extra_param("prompt", prompt)
            .set_pkce_challenge(pkce_challenge)
            .url();
        AuthorizeUrl {
            url,
            csrf: csrf.secret().clone(),
            nonce: nonce.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
        }
    }

    /// Exchange the authorization code and verify the id token, enforcing the
    /// trusted issuer prefix on top of the standard checks.
    pub async fn exchange(
        &self,
        code: String,
        pkce_verifier: String,
        nonce: String,
    ) -> Result<SignIn, AuthnError> {
        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
            .request_async(async_http_client)
            .await
            .map_err(|err| AuthnError::Exchange(err.to_string()))?;

        let id_token = token_response
            .id_token()
            .ok_or(AuthnError::MissingIdToken)?;
        let nonce = Nonce::new(nonce);
        let claims = id_token
            .claims(&self.client.id_token_verifier(), &nonce)
            .map_err(|err| AuthnError::Exchange(err.to_string()))?;

        let issuer = claims.issuer().as_str();
        if !issuer.starts_with(&self.trusted_issuer_prefix) {
            return Err(AuthnError::UntrustedIssuer(issuer.to_string()));
        }

        let extra = claims.additional_claims();
        let object_id = extra.oid.ok_or(AuthnError::MissingClaim("oid"))?;
        let tenant_id = extra.tid.ok_or(AuthnError::MissingClaim("tid"))?;
        let raw_name = extra
            .upn
            .clone()
            .or_else(|| {
                claims
                    .preferred_username()
                    .map(|name| name.as_str().to_string())
            })
            .or_else(|| claims.email().map(|email| email.as_str().to_string()))
            .unwrap_or_else(|| claims.subject().as_str().to_string());
        let display_name = claims
            .name()
            .and_then(|name| name.get(None))
            .map(|name| name.as_str().to_string());

        let user = DirectoryUser {
            object_id,
            tenant_id,
            unique_name: unique_name_of(&raw_name).to_string(),
            display_name,
            groups: extra.groups.clone().unwrap_or_default(),
            roles: extra.roles.clone().unwrap_or_default(),
            groups_overage: extra.has_group_overage(),
        };

        Ok(SignIn {
            user,
            access_token: token_response.access_token().secret().clone(),
            refresh_token: token_response
                .refresh_token()
                .map(|token| token.secret().clone()),
        })
    }
}

/// Guest accounts come through as `live.com#user@contoso.com`; the part after
/// the last `#` is the name the rest of the system keys on.
fn unique_name_of(raw: &str) -> &str {
    raw.rsplit('#').next().unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_takes_last_hash_segment() {
        assert_eq!(
            unique_name_of("live.com#user@contoso.com"),
            "user@contoso.com"
        );
        assert_eq!(unique_name_of("user@contoso.com"), "user@contoso.com");
    }

    #[test]
    fn group_overage_detected_from_claim_names() {
        let claims = DirectoryClaims {
            claim_names: Some(serde_json::json!({"groups": "src1"})),
            ..Default::default()
        };
        assert!(claims.has_group_overage());
        assert!(!DirectoryClaims::default().has_group_overage());
    }

    #[test]
    fn directory_claims_deserialize_from_token_payload() {
        let payload = serde_json::json!({
            "oid": "3b5e2b26-6d57-4e0c-9e5d-8f9a24c6f8aa",
            "tid": "e91d47c4-76f3-4271-a796-2a5bd42d41b7",
            "upn": "admin@contoso.com",
            "groups": ["9db2cdc1-2971-42fe-bd21-c7c4ead4b1b8"],
            "roles": ["trainer"]
        });
        let claims: DirectoryClaims = serde_json::from_value(payload).unwrap();
        assert_eq!(claims.upn.as_deref(), Some("admin@contoso.com"));
        assert_eq!(claims.groups.as_ref().map(Vec::len), Some(1));
        assert_eq!(claims.roles.as_ref().map(Vec::len), Some(1));
        assert!(!claims.has_group_overage());
    }
}
