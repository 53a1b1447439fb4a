use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::tokens::{TokenEndpointError, TokenSet, parse_endpoint_error};
use crate::{AuthnError, ProviderConfig};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Clone, Debug, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    /// Seconds to sleep between polls, supplied by the server.
    pub interval: u64,
    #[serde(default)]
    pub message: String,
}

/// Kick off a device login: the caller shows `verification_uri` + `user_code`
/// to the operator, then calls [`wait_for_device_token`].
pub async fn start_device_login(
    http: &reqwest::Client,
    config: &ProviderConfig,
    directory_id: &str,
    resource: &str,
) -> Result<DeviceCodeResponse, AuthnError> {
    let scope = format!(
        "{} offline_access openid profile",
        ProviderConfig::resource_scope(resource)
    );
    let params = [
        ("client_id", config.client_id.as_str()),
        ("scope", scope.as_str()),
    ];
    let response = http
        .post(config.devicecode_endpoint(directory_id))
        .form(&params)
        .send()
        .await?;
    if response.status().is_success() {
        Ok(response.json::<DeviceCodeResponse>().await?)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(parse_endpoint_error(&body))
    }
}

/// Poll the token endpoint serially at the server-supplied interval until the
/// operator approves, the code expires, or the endpoint reports a hard error.
pub async fn wait_for_device_token(
    http: &reqwest::Client,
    config: &ProviderConfig,
    directory_id: &str,
    code: &DeviceCodeResponse,
) -> Result<TokenSet, AuthnError> {
    let params = [
        ("client_id", config.client_id.as_str()),
        ("grant_type", DEVICE_CODE_GRANT),
        ("device_code", code.device_code.as_str()),
    ];
    loop {
        let response = http
            .post(config.token_endpoint(directory_id))
            .form(&params)
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(response.json::<TokenSet>().await?);
        }
        let body = response.text().await.unwrap_or_default();
        if pending(&body) {
            debug!(interval = code.interval, "authorization pending");
            tokio::time::sleep(Duration::from_secs(code.interval)).await;
            continue;
        }
        return Err(parse_endpoint_error(&body));
    }
}

fn pending(body: &str) -> bool {
    serde_json::from_str::<TokenEndpointError>(body)
        .map(|err| err.error.eq_ignore_ascii_case("authorization_pending"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_code_response_parses() {
        let body = r#"{
            "device_code": "DAQABAAEAAAD",
            "user_code": "F9AKLMNP3",
            "verification_uri": "https://microsoft.com/devicelogin",
            "expires_in": 900,
            "interval": 5,
            "message": "To sign in, use a web browser..."
        }"#;
        let response: DeviceCodeResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.user_code, "F9AKLMNP3");
        assert_eq!(response.interval, 5);
    }

    #[test]
    fn pending_recognises_authorization_pending() {
        assert!(pending(r#"{"error":"authorization_pending"}"#));
        assert!(!pending(r#"{"error":"expired_token"}"#));
        assert!(!pending("not json"));
    }
}
