use anyhow::{Context, Result, anyhow};
use axum_extra::extract::cookie::Key;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use platform_authn::ProviderConfig;
use platform_azure::ArmApiVersions;
use url::Url;

#[derive(Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    /// Tenant used for plain sign-in (connect flows re-challenge against the
    /// subscription's own tenant).
    pub home_directory_id: String,
    pub cookie_key: Key,
    pub cors_allowed_origins: Vec<String>,
    pub graph_identifier: String,
    pub graph_api_version: String,
    pub arm_identifier: String,
    pub arm_api_versions: ArmApiVersions,
    /// Role granted to the app's service principal on connected subscriptions.
    pub required_arm_role: String,
    /// Template for the issuer URL written to a claimed organization;
    /// `{tenant}` is replaced with the tenant id.
    pub issuer_template: String,
    pub signup_redirect_url: String,
    pub session_ttl_hours: i64,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let client_id = env_required("CLIENT_ID")?;
        let client_secret = env_required("CLIENT_SECRET")?;
        let login_base = env_or("LOGIN_BASE", "https://login.microsoftonline.com");
        let redirect_url = env_required("REDIRECT_URL")?;
        let trusted_issuer_prefix =
            env_or("TRUSTED_ISSUER_PREFIX", "https://login.microsoftonline.com/");
        let home_directory_id = env_required("TENANT_ID")?;

        let cookie_secret =
            env_required("COOKIE_SECRET_BASE64").context("COOKIE_SECRET_BASE64 missing")?;
        let secret_bytes = STANDARD
            .decode(cookie_secret.trim())
            .context("invalid COOKIE_SECRET_BASE64")?;
        if secret_bytes.len() < 32 {
            return Err(anyhow!(
                "COOKIE_SECRET_BASE64 must decode to at least 32 bytes"
            ));
        }
        let cookie_key = Key::from(&secret_bytes[..32]);

        let cors_allowed_origins = env_or("CORS_ALLOWED_ORIGINS", "http://localhost:5173")
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect::<Vec<_>>();

        let signup_redirect_url = match std::env::var("SIGNUP_REDIRECT_URL") {
            Ok(value) => value,
            Err(_) => default_signup_redirect(&redirect_url)?,
        };

        let arm_api_versions = ArmApiVersions {
            subscriptions: env_or("ARM_SUBSCRIPTIONS_API_VERSION", "2014-04-01"),
            permissions: env_or("ARM_PERMISSIONS_API_VERSION", "2015-07-01"),
            role_assignments: env_or("ARM_ROLE_ASSIGNMENTS_API_VERSION", "2015-07-01"),
            role_definitions: env_or("ARM_ROLE_DEFINITIONS_API_VERSION", "2015-07-01"),
        };

        let session_ttl_hours = env_or("SESSION_TTL_HOURS", "8")
            .parse::<i64>()
            .context("SESSION_TTL_HOURS must be an integer")?;

        Ok(Self {
            provider: ProviderConfig {
                client_id,
                client_secret,
                login_base,
                redirect_url,
                trusted_issuer_prefix,
            },
            home_directory_id,
            cookie_key,
            cors_allowed_origins,
            graph_identifier: env_or("GRAPH_API_IDENTIFIER", "https://graph.windows.net"),
            graph_api_version: env_or("GRAPH_API_VERSION", "1.6"),
            arm_identifier: env_or("ARM_IDENTIFIER", "https://management.azure.com"),
            arm_api_versions,
            required_arm_role: env_or("REQUIRED_ARM_ROLE", "Reader"),
            issuer_template: env_or("ISSUER_TEMPLATE", "https://sts.windows.net/{tenant}/"),
            signup_redirect_url,
            session_ttl_hours,
        })
    }
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing env {}", key))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// The signup flow answers on its own route of the same host as the auth
/// callback unless overridden.
fn default_signup_redirect(redirect_url: &str) -> Result<String> {
    let mut url = Url::parse(redirect_url).context("REDIRECT_URL is not a valid URL")?;
    url.set_path("/signup/callback");
    url.set_query(None);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_redirect_derives_from_auth_callback() {
        let derived = default_signup_redirect("https://app.contoso.com/auth/callback").unwrap();
        assert_eq!(derived, "https://app.contoso.com/signup/callback");
    }
}
