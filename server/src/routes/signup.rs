use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::Utc;
use platform_api::{ApiError, ApiResult};
use platform_authn::{ProviderConfig, peek_tenant_id};
use sea_orm::{ActiveModelTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::http::AppState;

use entity::organizations;

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct SignUpResponse {
    pub organization_id: Uuid,
    /// Where to send the tenant administrator to consent; returning from it
    /// completes the signup.
    pub consent_url: String,
}

#[derive(Deserialize)]
pub struct ProcessCodeQuery {
    pub code: Option<String>,
    pub state: String,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Serialize)]
pub struct SignUpComplete {
    pub organization_id: Uuid,
    pub issuer: String,
}

fn internal(err: impl Into<anyhow::Error>) -> ApiError {
    ApiError::internal(err.into())
}

/// Start onboarding a tenant: record the organization with a random state
/// marker as its issuer, then send its administrator off to admin consent.
/// The marker proves the eventual callback belongs to a signup we started.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<SignUpRequest>,
) -> ApiResult<(StatusCode, Json<SignUpResponse>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("name must not be empty".into()));
    }
    let marker = Uuid::new_v4().to_string();
    let organization_id = Uuid::new_v4();
    let model = organizations::ActiveModel {
        id: Set(organization_id),
        name: Set(request.name.trim().to_string()),
        issuer: Set(marker.clone()),
        created_on: Set(Utc::now().into()),
    };
    model.insert(&state.pool).await.map_err(internal)?;
    info!(organization = %organization_id, "signup started");

    let consent_url = admin_consent_url(&state, &marker)?;
    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            organization_id,
            consent_url,
        }),
    ))
}

/// Finish onboarding: the consent redirect must carry a state marker we
/// issued; the code exchange tells us which tenant consented, and that
/// tenant's issuer URL replaces the marker. Stale unclaimed signups are
/// swept on the way out.
pub async fn process_code(
    State(state): State<AppState>,
    Query(query): Query<ProcessCodeQuery>,
) -> ApiResult<Json<SignUpComplete>> {
    if let Some(error) = query.error {
        return Err(ApiError::InvalidInput(format!(
            "consent failed: {error}: {}",
            query.error_description.unwrap_or_default()
        )));
    }
    let org = platform_db::organization_by_marker(&state.pool, &query.state)
        .await
        .map_err(internal)?
        .ok_or(ApiError::NotFound)?;
    let code = query
        .code
        .ok_or_else(|| ApiError::InvalidInput("missing authorization code".into()))?;

    let tokens = state
        .tokens
        .authorization_code(
            "organizations",
            &code,
            &state.config.signup_redirect_url,
            &state.config.graph_identifier,
        )
        .await
        .map_err(internal)?;
    let tenant_id = peek_tenant_id(&tokens.access_token)
        .or_else(|| tokens.id_token.as_deref().and_then(peek_tenant_id))
        .ok_or_else(|| ApiError::internal(anyhow::anyhow!("token carried no tenant id")))?;

    let issuer = state.config.issuer_template.replace("{tenant}", &tenant_id);
    let org = platform_db::claim_organization(&state.pool, org, issuer)
        .await
        .map_err(internal)?;

    let purged = platform_db::purge_stale_signups(&state.pool, Utc::now())
        .await
        .map_err(internal)?;
    if purged > 0 {
        info!(purged, "removed stale signup attempts");
    }

    Ok(Json(SignUpComplete {
        organization_id: org.id,
        issuer: org.issuer,
    }))
}

/// Authorize URL that triggers tenant-wide provisioning of the app.
fn admin_consent_url(state: &AppState, marker: &str) -> ApiResult<String> {
    let config = &state.config;
    let authorize = format!(
        "{}/organizations/oauth2/v2.0/authorize",
        config.provider.login_base.trim_end_matches('/')
    );
    let scope = format!(
        "openid {}",
        ProviderConfig::resource_scope(&config.graph_identifier)
    );
    let url = Url::parse_with_params(
        &authorize,
        &[
            ("response_type", "code"),
            ("response_mode", "query"),
            ("client_id", config.provider.client_id.as_str()),
            ("scope", scope.as_str()),
            ("redirect_uri", config.signup_redirect_url.as_str()),
            ("state", marker),
            ("prompt", "admin_consent"),
        ],
    )
    .map_err(|err| ApiError::internal(err.into()))?;
    Ok(url.to_string())
}
