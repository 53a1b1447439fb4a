use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AzureApiError, AzureResult, ValueList};

/// Directory role templates whose members are treated as application admins:
/// Global Administrator and User Account Administrator.
const ADMIN_ROLE_TEMPLATE_IDS: [&str; 2] = [
    "62e90394-69f5-4237-9190-012177145e10",
    "fe930be7-5e62-47db-91af-98c3a49a38b1",
];

/// Client for the AAD Graph API (`https://graph.windows.net`), versioned via
/// the `api-version` query parameter.
#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    identifier: String,
    api_version: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServicePrincipal {
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(rename = "appId")]
    pub app_id: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DirectoryObject {
    #[serde(rename = "objectId")]
    pub object_id: Option<String>,
    #[serde(rename = "objectType")]
    pub object_type: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "roleTemplateId")]
    pub role_template_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DirectoryUserRecord {
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "userPrincipalName")]
    pub user_principal_name: Option<String>,
    #[serde(rename = "userType")]
    pub user_type: Option<String>,
}

/// Application registration payload for the installer.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub identifier_uris: Vec<String>,
    #[serde(default)]
    pub reply_urls: Vec<String>,
    #[serde(default)]
    pub required_resource_access: Vec<RequiredResourceAccess>,
    // Never echoed back by the directory; only sent on create.
    #[serde(default, skip_deserializing)]
    pub key_credentials: Vec<KeyCredential>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredResourceAccess {
    pub resource_app_id: String,
    pub resource_access: Vec<ResourceAccess>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResourceAccess {
    pub id: String,
    #[serde(rename = "type")]
    pub access_type: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCredential {
    pub custom_key_identifier: String,
    pub key_id: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub usage: String,
    pub value: String,
}

impl GraphClient {
    pub fn new(http: reqwest::Client, identifier: String, api_version: String) -> Self {
        Self {
            http,
            identifier: identifier.trim_end_matches('/').to_string(),
            api_version,
        }
    }

    fn url(&self, tenant: &str, path: &str) -> String {
        format!("{}/{}/{}", self.identifier, tenant, path)
    }

    /// objectId of the service principal that `app_id` has in the directory,
    /// or None when the app is not provisioned there (or the call fails).
    pub async fn service_principal_object_id(
        &self,
        token: &str,
        directory_id: &str,
        app_id: &str,
    ) -> AzureResult<Option<String>> {
        let filter = format!("appId eq '{app_id}'");
        let response = self
            .http
            .get(self.url(directory_id, "servicePrincipals"))
            .query(&[
                ("api-version", self.api_version.as_str()),
                ("$filter", filter.as_str()),
            ])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let list = response.json::<ValueList<ServicePrincipal>>().await?;
        Ok(list.value.into_iter().next().map(|sp| sp.object_id))
    }

    /// objectId of the single user or group matching the search string.
    /// Users are tried first (displayName or UPN prefix), then groups;
    /// anything but exactly one match yields None.
    pub async fn lookup_user_or_group(
        &self,
        token: &str,
        directory_id: &str,
        query: &str,
    ) -> AzureResult<Option<String>> {
        let filter = format!(
            "startswith(displayName,'{query}') or startswith(userPrincipalName,'{query}')"
        );
        let users = self
            .list_objects(token, directory_id, "users", &filter)
            .await?;
        if users.len() == 1 {
            return Ok(users.into_iter().next().and_then(|o| o.object_id));
        }

        let filter = format!("startswith(displayName,'{query}')");
        let groups = self
            .list_objects(token, directory_id, "groups", &filter)
            .await?;
        if groups.len() == 1 {
            return Ok(groups.into_iter().next().and_then(|o| o.object_id));
        }
        Ok(None)
    }

    async fn list_objects(
        &self,
        token: &str,
        directory_id: &str,
        collection: &str,
        filter: &str,
    ) -> AzureResult<Vec<DirectoryObject>> {
        let response = self
            .http
            .get(self.url(directory_id, collection))
            .query(&[
                ("api-version", self.api_version.as_str()),
                ("$filter", filter),
            ])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(Vec::new());
        }
        Ok(response.json::<ValueList<DirectoryObject>>().await?.value)
    }

    /// `"displayName (objectType)"` for a directory object, shown next to
    /// access control entries.
    pub async fn display_name(
        &self,
        token: &str,
        directory_id: &str,
        object_id: &str,
    ) -> AzureResult<Option<String>> {
        let response = self
            .http
            .get(self.url(directory_id, &format!("directoryObjects/{object_id}")))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let object = response.json::<DirectoryObject>().await?;
        Ok(Some(format!(
            "{} ({})",
            object.display_name.unwrap_or_default(),
            object.object_type.unwrap_or_default()
        )))
    }

    /// Full group membership for a user, used when the token carried a groups
    /// overage claim instead of the group list itself.
    pub async fn member_groups(
        &self,
        token: &str,
        directory_id: &str,
        user_object_id: &str,
    ) -> AzureResult<Vec<String>> {
        let response = self
            .http
            .post(self.url(
                directory_id,
                &format!("users/{user_object_id}/getMemberGroups"),
            ))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .json(&serde_json::json!({ "securityEnabledOnly": false }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AzureApiError::from_response(response).await);
        }
        Ok(response.json::<ValueList<String>>().await?.value)
    }

    /// Whether the user holds a directory admin role (Global Administrator or
    /// User Account Administrator), which auto-grants the application's
    /// `admin` role.
    pub async fn is_directory_admin(
        &self,
        token: &str,
        directory_id: &str,
        user_object_id: &str,
    ) -> AzureResult<bool> {
        let response = self
            .http
            .get(self.url(directory_id, &format!("users/{user_object_id}/memberOf")))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let objects = response.json::<ValueList<DirectoryObject>>().await?.value;
        Ok(objects.iter().any(is_admin_role))
    }

    /// The signed-in user behind a delegated token (`/me`).
    pub async fn me(&self, token: &str) -> AzureResult<DirectoryUserRecord> {
        let response = self
            .http
            .get(format!("{}/me", self.identifier))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AzureApiError::from_response(response).await);
        }
        Ok(response.json::<DirectoryUserRecord>().await?)
    }

    /// Installer: find an existing application registration by display name.
    pub async fn find_application(
        &self,
        token: &str,
        display_name: &str,
    ) -> AzureResult<Option<ApplicationRequest>> {
        let filter = format!("displayName eq '{display_name}'");
        let response = self
            .http
            .get(self.url("myorganization", "applications"))
            .query(&[
                ("api-version", self.api_version.as_str()),
                ("$filter", filter.as_str()),
            ])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let list = response.json::<ValueList<ApplicationRequest>>().await?;
        Ok(list.value.into_iter().next())
    }

    /// Installer: remove a previous registration before re-creating it.
    pub async fn delete_application(&self, token: &str, object_id: &str) -> AzureResult<()> {
        let response = self
            .http
            .delete(self.url("myorganization", &format!("applications/{object_id}")))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AzureApiError::from_response(response).await);
        }
        Ok(())
    }

    /// Installer: create the application registration.
    pub async fn create_application(
        &self,
        token: &str,
        app: &ApplicationRequest,
    ) -> AzureResult<()> {
        debug!(display_name = %app.display_name, "registering application");
        let response = self
            .http
            .post(self.url("myorganization", "applications"))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .json(app)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AzureApiError::from_response(response).await);
        }
        Ok(())
    }
}

fn is_admin_role(object: &DirectoryObject) -> bool {
    object.object_type.as_deref() == Some("Role")
        && object
            .role_template_id
            .as_deref()
            .map(|id| {
                ADMIN_ROLE_TEMPLATE_IDS
                    .iter()
                    .any(|template| template.eq_ignore_ascii_case(id))
            })
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_role_detection_matches_templates_case_insensitively() {
        let role = DirectoryObject {
            object_id: None,
            object_type: Some("Role".into()),
            display_name: Some("Company Administrator".into()),
            role_template_id: Some("62E90394-69F5-4237-9190-012177145E10".into()),
        };
        assert!(is_admin_role(&role));

        let group = DirectoryObject {
            object_type: Some("Group".into()),
            ..role.clone()
        };
        assert!(!is_admin_role(&group));

        let other_role = DirectoryObject {
            role_template_id: Some("729827e3-9c14-49f7-bb1b-9608f156bbb8".into()),
            ..role
        };
        assert!(!is_admin_role(&other_role));
    }

    #[test]
    fn service_principal_list_parses() {
        let body = r#"{"value":[{"objectId":"a1b2","appId":"9d6614ce-9a62-464f-b0c6-3c97120fb98a","displayName":"Cloudpoint"}]}"#;
        let list: ValueList<ServicePrincipal> = serde_json::from_str(body).unwrap();
        assert_eq!(list.value[0].object_id, "a1b2");
    }

    #[test]
    fn application_request_serializes_camel_case() {
        let app = ApplicationRequest {
            display_name: "Cloudpoint-host".into(),
            homepage: Some("https://localhost/".into()),
            identifier_uris: vec!["https://localhost/".into()],
            reply_urls: vec!["https://localhost/".into()],
            required_resource_access: vec![RequiredResourceAccess {
                resource_app_id: "00000002-0000-0000-c000-000000000000".into(),
                resource_access: vec![ResourceAccess {
                    id: "311a71cc-e848-46a1-bdf8-97ff7156d8e6".into(),
                    access_type: "Scope".into(),
                }],
            }],
            key_credentials: vec![],
            ..Default::default()
        };
        let json = serde_json::to_value(&app).unwrap();
        assert_eq!(json["displayName"], "Cloudpoint-host");
        assert_eq!(json["identifierUris"][0], "https://localhost/");
        assert_eq!(
            json["requiredResourceAccess"][0]["resourceAccess"][0]["type"],
            "Scope"
        );
        assert!(json.get("objectId").is_none());
    }
}
