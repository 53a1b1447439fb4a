use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use entity::{access_control_entries, trainings};
use platform_api::{ApiError, ApiResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, NotSet, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::http::{
    AppState, Principal, ROLE_ADMIN, ROLE_TRAINEE, ROLE_TRAINER, load_session, require_role,
};

const ANY_ROLE: &[&str] = &[ROLE_ADMIN, ROLE_TRAINER, ROLE_TRAINEE];
const EDITOR_ROLES: &[&str] = &[ROLE_ADMIN, ROLE_TRAINER];

#[derive(Serialize)]
pub struct TrainingSummary {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub created_by: Uuid,
    pub organization_id: Uuid,
    pub is_mine: bool,
}

#[derive(Serialize)]
pub struct SharedPrincipal {
    pub entry_id: i32,
    pub principal_id: Uuid,
    /// `"displayName (objectType)"`, resolved from the directory; None when
    /// the lookup fails (e.g. the principal was deleted).
    pub display_name: Option<String>,
}

#[derive(Serialize)]
pub struct TrainingDetail {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub created_by: Uuid,
    pub organization_id: Uuid,
    pub shared_with: Vec<SharedPrincipal>,
}

#[derive(Deserialize)]
pub struct TrainingInput {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct ShareRequest {
    /// Display name or UPN prefix that must match exactly one directory user
    /// or group.
    pub query: String,
}

#[derive(Deserialize)]
pub struct UnshareRequest {
    pub entry_id: i32,
}

fn internal(err: impl Into<anyhow::Error>) -> ApiError {
    ApiError::internal(err.into())
}

/// Trainings the caller created plus the ones shared with them directly or
/// through any of their groups.
pub async fn list(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> ApiResult<Json<Vec<TrainingSummary>>> {
    let principal = load_session(&state, &jar).await?;
    require_role(&principal, ANY_ROLE)?;
    let visible = platform_db::trainings_visible_to(
        &state.pool,
        principal.object_id,
        &principal.principal_ids(),
    )
    .await
    .map_err(internal)?;
    let out = visible
        .into_iter()
        .map(|t| TrainingSummary {
            is_mine: t.created_by == principal.object_id,
            id: t.id,
            name: t.name,
            description: t.description,
            created_by: t.created_by,
            organization_id: t.organization_id,
        })
        .collect();
    Ok(Json(out))
}

pub async fn details(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(id): Path<i32>,
) -> ApiResult<Json<TrainingDetail>> {
    let principal = load_session(&state, &jar).await?;
    require_role(&principal, ANY_ROLE)?;
    let (training, shares) = load_training_with_shares(&state, id).await?;

    let shared_ids: Vec<Uuid> = shares.iter().map(|ace| ace.principal_id).collect();
    let caller_ids = principal.principal_ids();
    let shared_with_caller = caller_ids.iter().any(|pid| shared_ids.contains(pid));
    if training.created_by != principal.object_id && !shared_with_caller {
        return Err(ApiError::forbidden(
            "this training has not been shared with you",
        ));
    }

    let detail = detail_payload(&state, training, shares).await?;
    Ok(Json(detail))
}

pub async fn create(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(input): Json<TrainingInput>,
) -> ApiResult<(StatusCode, Json<TrainingSummary>)> {
    let principal = load_session(&state, &jar).await?;
    require_role(&principal, EDITOR_ROLES)?;
    if input.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("name must not be empty".into()));
    }
    let model = trainings::ActiveModel {
        id: NotSet,
        name: Set(input.name.trim().to_string()),
        description: Set(input.description.unwrap_or_default()),
        created_by: Set(principal.object_id),
        organization_id: Set(principal.tenant_id),
    };
    let created = model.insert(&state.pool).await.map_err(internal)?;
    info!(training = created.id, "training created");
    Ok((
        StatusCode::CREATED,
        Json(TrainingSummary {
            is_mine: true,
            id: created.id,
            name: created.name,
            description: created.description,
            created_by: created.created_by,
            organization_id: created.organization_id,
        }),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(id): Path<i32>,
    Json(input): Json<TrainingInput>,
) -> ApiResult<StatusCode> {
    let principal = load_session(&state, &jar).await?;
    require_role(&principal, EDITOR_ROLES)?;
    let training = find_training(&state, id).await?;
    ensure_creator(&training, &principal, "only the creator can edit a training")?;
    if input.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("name must not be empty".into()));
    }
    let mut active: trainings::ActiveModel = training.into();
    active.name = Set(input.name.trim().to_string());
    if let Some(description) = input.description {
        active.description = Set(description);
    }
    active.update(&state.pool).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(id): Path<i32>,
) -> ApiResult<StatusCode> {
    let principal = load_session(&state, &jar).await?;
    require_role(&principal, EDITOR_ROLES)?;
    let training = find_training(&state, id).await?;
    ensure_creator(&training, &principal, "only the creator can delete a training")?;
    training.delete(&state.pool).await.map_err(internal)?;
    info!(training = id, "training deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Share with the single directory user or group the query resolves to.
pub async fn share(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(id): Path<i32>,
    Json(request): Json<ShareRequest>,
) -> ApiResult<Json<TrainingDetail>> {
    let principal = load_session(&state, &jar).await?;
    require_role(&principal, EDITOR_ROLES)?;
    let training = find_training(&state, id).await?;
    ensure_creator(&training, &principal, "only the creator can share a training")?;

    let tenant = training.organization_id.to_string();
    let graph_token = state.app_graph_token(&tenant).await?;
    let object_id = state
        .graph
        .lookup_user_or_group(&graph_token, &tenant, &request.query)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::InvalidInput(
                "the search string must match exactly one user or group".into(),
            )
        })?;
    let principal_id = Uuid::parse_str(&object_id)
        .map_err(|_| ApiError::internal(anyhow::anyhow!("directory returned non-GUID objectId")))?;

    let existing = access_control_entries::Entity::find()
        .filter(access_control_entries::Column::TrainingId.eq(training.id))
        .filter(access_control_entries::Column::PrincipalId.eq(principal_id))
        .one(&state.pool)
        .await
        .map_err(internal)?;
    if existing.is_none() {
        let entry = access_control_entries::ActiveModel {
            id: NotSet,
            training_id: Set(training.id),
            principal_id: Set(principal_id),
        };
        entry.insert(&state.pool).await.map_err(internal)?;
        info!(training = training.id, principal = %principal_id, "training shared");
    }

    let shares = training
        .find_related(access_control_entries::Entity)
        .all(&state.pool)
        .await
        .map_err(internal)?;
    let detail = detail_payload(&state, training, shares).await?;
    Ok(Json(detail))
}

pub async fn unshare(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(id): Path<i32>,
    Json(request): Json<UnshareRequest>,
) -> ApiResult<Json<TrainingDetail>> {
    let principal = load_session(&state, &jar).await?;
    require_role(&principal, EDITOR_ROLES)?;
    let training = find_training(&state, id).await?;
    ensure_creator(&training, &principal, "only the creator can unshare a training")?;

    let entry = access_control_entries::Entity::find_by_id(request.entry_id)
        .one(&state.pool)
        .await
        .map_err(internal)?
        .ok_or(ApiError::NotFound)?;
    if entry.training_id != training.id {
        return Err(ApiError::InvalidInput(
            "entry does not belong to this training".into(),
        ));
    }
    entry.delete(&state.pool).await.map_err(internal)?;

    let shares = training
        .find_related(access_control_entries::Entity)
        .all(&state.pool)
        .await
        .map_err(internal)?;
    let detail = detail_payload(&state, training, shares).await?;
    Ok(Json(detail))
}

async fn find_training(state: &AppState, id: i32) -> ApiResult<trainings::Model> {
    trainings::Entity::find_by_id(id)
        .one(&state.pool)
        .await
        .map_err(internal)?
        .ok_or(ApiError::NotFound)
}

async fn load_training_with_shares(
    state: &AppState,
    id: i32,
) -> ApiResult<(trainings::Model, Vec<access_control_entries::Model>)> {
    let training = find_training(state, id).await?;
    let shares = training
        .find_related(access_control_entries::Entity)
        .all(&state.pool)
        .await
        .map_err(internal)?;
    Ok((training, shares))
}

fn ensure_creator(
    training: &trainings::Model,
    principal: &Principal,
    message: &str,
) -> ApiResult<()> {
    if training.created_by == principal.object_id {
        Ok(())
    } else {
        Err(ApiError::forbidden(message))
    }
}

/// Resolve each shared principal's display name so the caller can render the
/// access list; lookups are sequential, one per entry.
async fn detail_payload(
    state: &AppState,
    training: trainings::Model,
    shares: Vec<access_control_entries::Model>,
) -> ApiResult<TrainingDetail> {
    let tenant = training.organization_id.to_string();
    let graph_token = state.app_graph_token(&tenant).await?;
    let mut shared_with = Vec::with_capacity(shares.len());
    for entry in shares {
        let display_name = state
            .graph
            .display_name(&graph_token, &tenant, &entry.principal_id.to_string())
            .await
            .map_err(internal)?;
        shared_with.push(SharedPrincipal {
            entry_id: entry.id,
            principal_id: entry.principal_id,
            display_name,
        });
    }
    Ok(TrainingDetail {
        id: training.id,
        name: training.name,
        description: training.description,
        created_by: training.created_by,
        organization_id: training.organization_id,
        shared_with,
    })
}
