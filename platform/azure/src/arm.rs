use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::permissions::{self, PermissionSet};
use crate::{AzureApiError, AzureResult, ValueList};

/// `api-version` values for the ARM endpoints the app touches.
#[derive(Clone, Debug)]
pub struct ArmApiVersions {
    pub subscriptions: String,
    pub permissions: String,
    pub role_assignments: String,
    pub role_definitions: String,
}

impl Default for ArmApiVersions {
    fn default() -> Self {
        Self {
            subscriptions: "2014-04-01".into(),
            permissions: "2015-07-01".into(),
            role_assignments: "2015-07-01".into(),
            role_definitions: "2015-07-01".into(),
        }
    }
}

/// Client for Azure Resource Manager (`https://management.azure.com`).
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    identifier: String,
    versions: ArmApiVersions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(rename = "subscriptionId")]
    pub subscription_id: Uuid,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RoleDefinition {
    pub id: String,
    pub properties: RoleDefinitionProperties,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RoleDefinitionProperties {
    #[serde(rename = "roleName")]
    pub role_name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RoleAssignment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize)]
struct RoleAssignmentRequest<'a> {
    properties: RoleAssignmentProperties<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleAssignmentProperties<'a> {
    role_definition_id: &'a str,
    principal_id: &'a str,
}

impl ArmClient {
    pub fn new(http: reqwest::Client, identifier: String, versions: ArmApiVersions) -> Self {
        Self {
            http,
            identifier: identifier.trim_end_matches('/').to_string(),
            versions,
        }
    }

    fn subscription_url(&self, subscription_id: Uuid, path: &str) -> String {
        if path.is_empty() {
            format!("{}/subscriptions/{}", self.identifier, subscription_id)
        } else {
            format!(
                "{}/subscriptions/{}/{}",
                self.identifier, subscription_id, path
            )
        }
    }

    /// Recover the tenant that owns a subscription from the 401 challenge an
    /// anonymous request provokes. Any outcome other than a parseable
    /// challenge yields None.
    pub async fn directory_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> AzureResult<Option<Uuid>> {
        let response = self
            .http
            .get(self.subscription_url(subscription_id, ""))
            .query(&[("api-version", self.versions.subscriptions.as_str())])
            .send()
            .await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let header = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        Ok(tenant_from_www_authenticate(header))
    }

    /// Subscriptions the token's principal can see at all.
    pub async fn user_subscriptions(&self, token: &str) -> AzureResult<Vec<SubscriptionRecord>> {
        let response = self
            .http
            .get(format!("{}/subscriptions", self.identifier))
            .query(&[("api-version", self.versions.subscriptions.as_str())])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(Vec::new());
        }
        Ok(response
            .json::<ValueList<SubscriptionRecord>>()
            .await?
            .value)
    }

    async fn fetch_permissions(
        &self,
        token: &str,
        subscription_id: Uuid,
    ) -> AzureResult<Vec<PermissionSet>> {
        let response = self
            .http
            .get(self.subscription_url(
                subscription_id,
                "providers/microsoft.authorization/permissions",
            ))
            .query(&[("api-version", self.versions.permissions.as_str())])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            // No permissions readable means no access; mirror that rather
            // than failing the whole request.
            return Ok(Vec::new());
        }
        Ok(response.json::<ValueList<PermissionSet>>().await?.value)
    }

    /// Can the token's principal write role assignments on the subscription?
    pub async fn can_manage_access(&self, token: &str, subscription_id: Uuid) -> AzureResult<bool> {
        let sets = self.fetch_permissions(token, subscription_id).await?;
        Ok(permissions::allows_action(
            &sets,
            permissions::MANAGE_ACCESS_ACTION,
        ))
    }

    /// Does the token's principal still have read access? Drives the
    /// transient needs-repair flag on connected subscriptions.
    pub async fn has_read_access(&self, token: &str, subscription_id: Uuid) -> AzureResult<bool> {
        let sets = self.fetch_permissions(token, subscription_id).await?;
        Ok(permissions::allows_read(&sets))
    }

    /// Full role definition id for a built-in role name, e.g. `Reader`.
    pub async fn role_definition_id(
        &self,
        token: &str,
        subscription_id: Uuid,
        role_name: &str,
    ) -> AzureResult<Option<String>> {
        let response = self
            .http
            .get(self.subscription_url(
                subscription_id,
                "providers/Microsoft.Authorization/roleDefinitions",
            ))
            .query(&[("api-version", self.versions.role_definitions.as_str())])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let definitions = response.json::<ValueList<RoleDefinition>>().await?.value;
        Ok(definitions
            .into_iter()
            .find(|def| def.properties.role_name.eq_ignore_ascii_case(role_name))
            .map(|def| def.id))
    }

    /// Assign `role_name` on the subscription to a principal. The assignment
    /// name is a fresh GUID, as ARM requires.
    pub async fn grant_role(
        &self,
        token: &str,
        principal_object_id: &str,
        subscription_id: Uuid,
        role_name: &str,
    ) -> AzureResult<()> {
        let Some(role_definition_id) = self
            .role_definition_id(token, subscription_id, role_name)
            .await?
        else {
            return Err(AzureApiError::Status {
                status: 404,
                body: format!("role definition '{role_name}' not found"),
            });
        };
        let assignment_id = Uuid::new_v4();
        let body = RoleAssignmentRequest {
            properties: RoleAssignmentProperties {
                role_definition_id: &role_definition_id,
                principal_id: principal_object_id,
            },
        };
        info!(%subscription_id, principal = principal_object_id, role = role_name, "granting role");
        let response = self
            .http
            .put(self.subscription_url(
                subscription_id,
                &format!("providers/microsoft.authorization/roleassignments/{assignment_id}"),
            ))
            .query(&[("api-version", self.versions.role_assignments.as_str())])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AzureApiError::from_response(response).await);
        }
        Ok(())
    }

    /// Delete every role assignment the principal holds on the subscription.
    pub async fn revoke_role(
        &self,
        token: &str,
        principal_object_id: &str,
        subscription_id: Uuid,
    ) -> AzureResult<()> {
        let filter = format!("principalId eq '{principal_object_id}'");
        let response = self
            .http
            .get(self.subscription_url(
                subscription_id,
                "providers/microsoft.authorization/roleassignments",
            ))
            .query(&[
                ("api-version", self.versions.role_assignments.as_str()),
                ("$filter", filter.as_str()),
            ])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(());
        }
        let assignments = response.json::<ValueList<RoleAssignment>>().await?.value;
        for assignment in assignments {
            debug!(assignment = %assignment.id, "deleting role assignment");
            // Assignment ids come back fully qualified (/subscriptions/...).
            let url = format!("{}{}", self.identifier, assignment.id);
            let _ = self
                .http
                .delete(url)
                .query(&[("api-version", self.versions.role_assignments.as_str())])
                .bearer_auth(token)
                .send()
                .await?;
        }
        Ok(())
    }
}

/// Pull the owning tenant id out of a 401 `WWW-Authenticate` challenge of the
/// form `Bearer authorization_uri="https://login.windows.net/{tenant}", ...`:
/// first comma-separated part, value after `=`, 36 characters after the last
/// slash.
pub fn tenant_from_www_authenticate(header: &str) -> Option<Uuid> {
    let first = header.split(',').next()?;
    let value = first.splitn(2, '=').nth(1)?.trim().trim_matches('"');
    let after_slash = value.rfind('/').map(|idx| &value[idx + 1..])?;
    let guid = after_slash.get(..36)?;
    Uuid::parse_str(guid).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_extracted_from_challenge_header() {
        let header = r#"Bearer authorization_uri="https://login.windows.net/e91d47c4-76f3-4271-a796-2a5bd42d41b7", error="invalid_token", error_description="The access token is missing.""#;
        assert_eq!(
            tenant_from_www_authenticate(header),
            Some(Uuid::parse_str("e91d47c4-76f3-4271-a796-2a5bd42d41b7").unwrap())
        );
    }

    #[test]
    fn malformed_challenges_yield_none() {
        assert_eq!(tenant_from_www_authenticate(""), None);
        assert_eq!(tenant_from_www_authenticate("Bearer realm"), None);
        assert_eq!(
            tenant_from_www_authenticate(r#"Bearer authorization_uri="https://login.windows.net/not-a-guid""#),
            None
        );
    }

    #[test]
    fn permissions_response_parses_with_missing_not_actions() {
        let body = r#"{"value":[{"actions":["*"],"notActions":["Microsoft.Authorization/*/Write"]},{"actions":["*/read"]}]}"#;
        let list: ValueList<PermissionSet> = serde_json::from_str(body).unwrap();
        assert_eq!(list.value.len(), 2);
        assert!(list.value[1].not_actions.is_empty());
    }

    #[test]
    fn role_assignment_body_has_arm_shape() {
        let body = RoleAssignmentRequest {
            properties: RoleAssignmentProperties {
                role_definition_id: "/subscriptions/x/providers/Microsoft.Authorization/roleDefinitions/acdd72a7",
                principal_id: "a1b2c3",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["properties"]["roleDefinitionId"],
            "/subscriptions/x/providers/Microsoft.Authorization/roleDefinitions/acdd72a7"
        );
        assert_eq!(json["properties"]["principalId"], "a1b2c3");
    }

    #[test]
    fn role_definitions_response_parses() {
        let body = r#"{"value":[
            {"id":"/subscriptions/x/providers/Microsoft.Authorization/roleDefinitions/b24988ac","properties":{"roleName":"Contributor"}},
            {"id":"/subscriptions/x/providers/Microsoft.Authorization/roleDefinitions/acdd72a7","properties":{"roleName":"Reader"}}
        ]}"#;
        let list: ValueList<RoleDefinition> = serde_json::from_str(body).unwrap();
        let reader = list
            .value
            .iter()
            .find(|def| def.properties.role_name.eq_ignore_ascii_case("reader"))
            .unwrap();
        assert!(reader.id.ends_with("acdd72a7"));
    }
}
