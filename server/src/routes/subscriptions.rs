use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::PrivateCookieJar;
use chrono::Utc;
use entity::subscriptions;
use platform_api::{ApiError, ApiResult};
use sea_orm::EntityTrait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::http::{AppState, load_session, maybe_load_session};

#[derive(Serialize)]
pub struct ConnectedSubscription {
    pub id: Uuid,
    pub directory_id: Uuid,
    pub connected_on: chrono::DateTime<chrono::FixedOffset>,
    pub connected_by: String,
    /// Transient: true when the service principal lost read access and the
    /// role assignment should be re-provisioned.
    pub needs_repair: bool,
}

#[derive(Serialize)]
pub struct AvailableSubscription {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub is_connected: bool,
    pub connected_on: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub connected_by: Option<String>,
    pub needs_repair: Option<bool>,
    pub can_manage_access: bool,
}

#[derive(Serialize)]
struct ReAuthRequired {
    login_url: String,
    directory_id: Uuid,
}

fn internal(err: impl Into<anyhow::Error>) -> ApiError {
    ApiError::internal(err.into())
}

/// Subscriptions connected by the signed-in user, each probed for read access
/// with an app-only token so the UI can offer repair.
pub async fn list(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> ApiResult<Json<Vec<ConnectedSubscription>>> {
    let principal = load_session(&state, &jar).await?;
    let rows = platform_db::subscriptions_connected_by(&state.pool, &principal.unique_name)
        .await
        .map_err(internal)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let app_token = state.app_arm_token(&row.directory_id.to_string()).await?;
        let readable = state
            .arm
            .has_read_access(&app_token, row.id)
            .await
            .map_err(internal)?;
        out.push(ConnectedSubscription {
            id: row.id,
            directory_id: row.directory_id,
            connected_on: row.connected_on,
            connected_by: row.connected_by,
            needs_repair: !readable,
        });
    }
    Ok(Json(out))
}

/// Every subscription the caller can see in ARM, annotated with connection
/// state and whether the caller could connect it (role-assignment writes).
pub async fn available(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> ApiResult<Json<Vec<AvailableSubscription>>> {
    let principal = load_session(&state, &jar).await?;
    let user_token = state.user_arm_token(&principal).await?;
    let records = state
        .arm
        .user_subscriptions(&user_token)
        .await
        .map_err(internal)?;
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let connected = subscriptions::Entity::find_by_id(record.subscription_id)
            .one(&state.pool)
            .await
            .map_err(|err| ApiError::internal(err.into()))?;
        let can_manage = state
            .arm
            .can_manage_access(&user_token, record.subscription_id)
            .await
            .map_err(internal)?;
        let needs_repair = match &connected {
            Some(row) => {
                let app_token = state.app_arm_token(&row.directory_id.to_string()).await?;
                Some(
                    !state
                        .arm
                        .has_read_access(&app_token, row.id)
                        .await
                        .map_err(internal)?,
                )
            }
            None => None,
        };
        out.push(AvailableSubscription {
            id: record.subscription_id,
            display_name: record.display_name,
            is_connected: connected.is_some(),
            connected_on: connected.as_ref().map(|row| row.connected_on),
            connected_by: connected.map(|row| row.connected_by),
            needs_repair,
            can_manage_access: can_manage,
        });
    }
    Ok(Json(out))
}

/// Connect a subscription: discover its tenant, re-challenge when the caller
/// is signed into a different one, then grant the app's service principal the
/// configured role and record the connection.
pub async fn connect(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let directory_id = state
        .arm
        .directory_for_subscription(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::InvalidInput("could not discover the subscription's directory".into())
        })?;

    let principal = match maybe_load_session(&state, &jar).await? {
        Some(principal) if principal.tenant_id == directory_id => principal,
        _ => {
            // Signed out, or signed into another tenant: the caller has to
            // authenticate against the subscription's own directory first.
            let login_url = format!(
                "/login?directory_id={directory_id}&return_to=/api/subscriptions/{id}/connect"
            );
            return Ok((
                StatusCode::CONFLICT,
                Json(ReAuthRequired {
                    login_url,
                    directory_id,
                }),
            )
                .into_response());
        }
    };

    let user_token = state.user_arm_token(&principal).await?;
    if !state
        .arm
        .can_manage_access(&user_token, id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::forbidden(
            "you cannot manage access for this subscription",
        ));
    }

    let sp_object_id = service_principal_for(&state, directory_id).await?;
    state
        .arm
        .grant_role(
            &user_token,
            &sp_object_id,
            id,
            &state.config.required_arm_role,
        )
        .await
        .map_err(internal)?;
    platform_db::insert_subscription_if_absent(
        &state.pool,
        id,
        directory_id,
        &principal.unique_name,
        Utc::now(),
    )
    .await
    .map_err(internal)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Disconnect: revoke every role assignment the service principal holds on
/// the subscription, then forget the row.
pub async fn disconnect(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let principal = load_session(&state, &jar).await?;
    let directory_id = resolve_directory(&state, id).await?;
    let user_token = state.user_arm_token(&principal).await?;
    let sp_object_id = service_principal_for(&state, directory_id).await?;
    state
        .arm
        .revoke_role(&user_token, &sp_object_id, id)
        .await
        .map_err(internal)?;
    platform_db::delete_subscription(&state.pool, id)
        .await
        .map_err(internal)?;
    info!(subscription = %id, "subscription disconnected");
    Ok(StatusCode::NO_CONTENT)
}

/// Repair a connection whose role assignment was deleted out from under us:
/// revoke whatever is left, then grant again. The row is untouched.
pub async fn repair(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let principal = load_session(&state, &jar).await?;
    let directory_id = resolve_directory(&state, id).await?;
    let user_token = state.user_arm_token(&principal).await?;
    let sp_object_id = service_principal_for(&state, directory_id).await?;
    state
        .arm
        .revoke_role(&user_token, &sp_object_id, id)
        .await
        .map_err(internal)?;
    state
        .arm
        .grant_role(
            &user_token,
            &sp_object_id,
            id,
            &state.config.required_arm_role,
        )
        .await
        .map_err(internal)?;
    info!(subscription = %id, "subscription connection repaired");
    Ok(StatusCode::NO_CONTENT)
}

/// Tenant of a subscription: the anonymous ARM probe first, the stored row as
/// fallback for subscriptions the probe can no longer resolve.
async fn resolve_directory(state: &AppState, id: Uuid) -> ApiResult<Uuid> {
    if let Some(directory_id) = state
        .arm
        .directory_for_subscription(id)
        .await
        .map_err(internal)?
    {
        return Ok(directory_id);
    }
    subscriptions::Entity::find_by_id(id)
        .one(&state.pool)
        .await
        .map_err(|err| ApiError::internal(err.into()))?
        .map(|row| row.directory_id)
        .ok_or(ApiError::NotFound)
}

/// objectId of our application's service principal in the given directory.
async fn service_principal_for(state: &AppState, directory_id: Uuid) -> ApiResult<String> {
    let graph_token = state.app_graph_token(&directory_id.to_string()).await?;
    state
        .graph
        .service_principal_object_id(
            &graph_token,
            &directory_id.to_string(),
            &state.config.provider.client_id,
        )
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::Conflict("application is not provisioned in the subscription's directory".into())
        })
}
