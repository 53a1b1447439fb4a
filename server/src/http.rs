use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{FromRef, Query, State},
    http::{self, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use chrono::{Duration, Utc};
use entity::sessions;
use platform_api::{ApiError, ApiResult};
use platform_authn::{OidcProvider, ProviderConfig, TempLoginState, TokenBroker};
use platform_azure::{ArmClient, GraphClient};
use platform_db::DbPool;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseBackend, EntityTrait, Set, Statement};
use serde::{Deserialize, Serialize};
use time::Duration as TimeDuration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{config::AppConfig, routes};

const SESSION_COOKIE: &str = "__Host-cp_session";
const OIDC_STATE_COOKIE: &str = "__Host-cp_oidc";

/// Application role names carried in sessions. `admin` is also granted
/// automatically to directory administrators at sign-in.
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_TRAINER: &str = "trainer";
pub const ROLE_TRAINEE: &str = "trainee";

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub cookie_key: Key,
    pub graph: GraphClient,
    pub arm: ArmClient,
    pub tokens: TokenBroker,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl AppState {
    /// App-only ARM token for a tenant (client credentials).
    pub async fn app_arm_token(&self, directory_id: &str) -> ApiResult<String> {
        let set = self
            .tokens
            .client_credentials(directory_id, &self.config.arm_identifier)
            .await
            .map_err(|err| ApiError::internal(err.into()))?;
        Ok(set.access_token)
    }

    /// App-only AAD Graph token for a tenant.
    pub async fn app_graph_token(&self, directory_id: &str) -> ApiResult<String> {
        let set = self
            .tokens
            .client_credentials(directory_id, &self.config.graph_identifier)
            .await
            .map_err(|err| ApiError::internal(err.into()))?;
        Ok(set.access_token)
    }

    /// On-behalf ARM token for the signed-in user, minted from the refresh
    /// token captured at sign-in.
    pub async fn user_arm_token(&self, principal: &Principal) -> ApiResult<String> {
        let refresh = principal
            .refresh_token
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;
        let set = self
            .tokens
            .refresh(
                &principal.tenant_id.to_string(),
                refresh,
                &self.config.arm_identifier,
            )
            .await
            .map_err(|err| ApiError::internal(err.into()))?;
        Ok(set.access_token)
    }
}

/// The signed-in user as the routes see them.
#[derive(Clone, Debug)]
pub struct Principal {
    pub session_id: Uuid,
    pub object_id: Uuid,
    pub tenant_id: Uuid,
    pub unique_name: String,
    pub display_name: Option<String>,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
    pub refresh_token: Option<String>,
}

impl Principal {
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.roles.iter().any(|r| roles.contains(&r.as_str()))
    }

    /// The caller's own objectId plus every group they belong to; the id set
    /// access control entries are matched against.
    pub fn principal_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .groups
            .iter()
            .filter_map(|g| Uuid::parse_str(g).ok())
            .collect();
        ids.push(self.object_id);
        ids
    }
}

/// 403 unless the principal holds one of the listed application roles.
pub fn require_role(principal: &Principal, roles: &[&str]) -> ApiResult<()> {
    if principal.has_any_role(roles) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "requires one of roles: {}",
            roles.join(", ")
        )))
    }
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "cloudpoint server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_credentials(true)
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health_handler))
        .route("/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/logout", post(logout_handler))
        .route("/api/subscriptions", get(routes::subscriptions::list))
        .route(
            "/api/subscriptions/available",
            get(routes::subscriptions::available),
        )
        .route(
            "/api/subscriptions/{id}/connect",
            post(routes::subscriptions::connect),
        )
        .route(
            "/api/subscriptions/{id}/disconnect",
            post(routes::subscriptions::disconnect),
        )
        .route(
            "/api/subscriptions/{id}/repair",
            post(routes::subscriptions::repair),
        )
        .route(
            "/api/trainings",
            get(routes::trainings::list).post(routes::trainings::create),
        )
        .route(
            "/api/trainings/{id}",
            get(routes::trainings::details)
                .put(routes::trainings::update)
                .delete(routes::trainings::remove),
        )
        .route("/api/trainings/{id}/share", post(routes::trainings::share))
        .route(
            "/api/trainings/{id}/unshare",
            post(routes::trainings::unshare),
        )
        .route("/signup", post(routes::signup::sign_up))
        .route("/signup/callback", get(routes::signup::process_code))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginQuery {
    directory_id: Option<String>,
    return_to: Option<String>,
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

async fn login_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(query): Query<LoginQuery>,
) -> ApiResult<(PrivateCookieJar, Redirect)> {
    let directory_id = query
        .directory_id
        .unwrap_or_else(|| state.config.home_directory_id.clone());
    let provider = OidcProvider::discover(&state.config.provider, &directory_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    // Ask for an ARM-audience code so sign-in also seeds the on-behalf
    // token used for subscription management.
    let scopes = vec![ProviderConfig::resource_scope(&state.config.arm_identifier)];
    let auth_url = provider.authorize(&scopes, "select_account");
    let temp_state = TempLoginState::new(&auth_url, &directory_id, query.return_to);
    let state_cookie = Cookie::build((
        OIDC_STATE_COOKIE,
        serde_json::to_string(&temp_state)
            .map_err(|err| ApiError::internal(err.into()))?,
    ))
    .path("/")
    .secure(true)
    .http_only(true)
    .same_site(SameSite::Lax)
    .max_age(TimeDuration::minutes(10))
    .build();
    let jar = jar.add(state_cookie);
    Ok((jar, Redirect::to(auth_url.url.as_str())))
}

async fn callback_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackQuery>,
) -> ApiResult<(PrivateCookieJar, Redirect)> {
    let Some(cookie) = jar.get(OIDC_STATE_COOKIE) else {
        return Err(ApiError::InvalidInput("missing authentication state".into()));
    };
    let jar = jar.remove(Cookie::build((OIDC_STATE_COOKIE, "")).path("/").build());
    let saved: TempLoginState = serde_json::from_str(cookie.value())
        .map_err(|_| ApiError::InvalidInput("invalid state cookie".into()))?;
    if saved.csrf != params.state {
        return Err(ApiError::InvalidInput("state mismatch".into()));
    }

    let provider = OidcProvider::discover(&state.config.provider, &saved.directory_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    let sign_in = provider
        .exchange(params.code.clone(), saved.pkce_verifier.clone(), saved.nonce.clone())
        .await
        .map_err(|err| ApiError::internal(err.into()))?;

    let user = sign_in.user;
    let tenant = user.tenant_id.to_string();
    let graph_token = state.app_graph_token(&tenant).await?;

    // When the token carried a groups overage marker the real group list has
    // to come from the directory.
    let groups = if user.groups_overage {
        state
            .graph
            .member_groups(&graph_token, &tenant, &user.object_id.to_string())
            .await
            .map_err(|err| ApiError::internal(err.into()))?
    } else {
        user.groups.clone()
    };

    // Directory admins get the application admin role without an explicit
    // app-role assignment.
    let mut roles = user.roles.clone();
    if !roles.iter().any(|r| r == ROLE_ADMIN) {
        let is_admin = state
            .graph
            .is_directory_admin(&graph_token, &tenant, &user.object_id.to_string())
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "directory admin check failed");
                false
            });
        if is_admin {
            roles.push(ROLE_ADMIN.to_string());
        }
    }

    let session_id = Uuid::new_v4();
    let now = Utc::now();
    let expires_at = now + Duration::hours(state.config.session_ttl_hours);
    let model = sessions::ActiveModel {
        id: Set(session_id),
        user_object_id: Set(user.object_id),
        tenant_id: Set(user.tenant_id),
        unique_name: Set(user.unique_name.clone()),
        display_name: Set(user.display_name.clone()),
        roles: Set(roles),
        group_ids: Set(groups),
        refresh_token: Set(sign_in.refresh_token),
        created_at: Set(now.into()),
        expires_at: Set(expires_at.into()),
    };
    model
        .insert(&state.pool)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    info!(user = %user.unique_name, tenant = %tenant, "signed in");

    let cookie = Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::hours(state.config.session_ttl_hours))
        .build();
    let jar = jar.add(cookie);
    let redirect_target = saved.return_to.unwrap_or_else(|| "/".into());
    Ok((jar, Redirect::to(&redirect_target)))
}

async fn logout_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> ApiResult<(PrivateCookieJar, StatusCode)> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Ok(session_id) = Uuid::parse_str(cookie.value()) {
            let _ = sessions::Entity::delete_by_id(session_id)
                .exec(&state.pool)
                .await;
        }
    }
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
    Ok((jar, StatusCode::NO_CONTENT))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state
        .pool
        .execute(Statement::from_string(
            DatabaseBackend::Postgres,
            "SELECT 1".to_string(),
        ))
        .await
        .is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

/// Resolve the session cookie to a principal, expiring stale rows on touch.
pub async fn load_session(state: &AppState, jar: &PrivateCookieJar) -> ApiResult<Principal> {
    maybe_load_session(state, jar)
        .await?
        .ok_or(ApiError::Unauthorized)
}

/// Like [`load_session`] but maps "no session" to None instead of 401, for
/// routes that re-challenge anonymous callers.
pub async fn maybe_load_session(
    state: &AppState,
    jar: &PrivateCookieJar,
) -> ApiResult<Option<Principal>> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(None);
    };
    let Ok(session_id) = Uuid::parse_str(cookie.value()) else {
        return Ok(None);
    };
    let Some(session) = sessions::Entity::find_by_id(session_id)
        .one(&state.pool)
        .await
        .map_err(|err| ApiError::internal(err.into()))?
    else {
        return Ok(None);
    };
    if session_expired(&session, Utc::now()) {
        let _ = sessions::Entity::delete_by_id(session_id)
            .exec(&state.pool)
            .await;
        return Ok(None);
    }
    Ok(Some(Principal {
        session_id: session.id,
        object_id: session.user_object_id,
        tenant_id: session.tenant_id,
        unique_name: session.unique_name,
        display_name: session.display_name,
        groups: session.group_ids,
        roles: session.roles,
        refresh_token: session.refresh_token,
    }))
}

fn session_expired(session: &sessions::Model, now: chrono::DateTime<Utc>) -> bool {
    session.expires_at.with_timezone(&Utc) < now
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[&str]) -> Principal {
        Principal {
            session_id: Uuid::new_v4(),
            object_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            unique_name: "user@contoso.com".into(),
            display_name: None,
            groups: vec![
                "9db2cdc1-2971-42fe-bd21-c7c4ead4b1b8".into(),
                "not-a-guid".into(),
            ],
            roles: roles.iter().map(|r| r.to_string()).collect(),
            refresh_token: None,
        }
    }

    #[test]
    fn role_gate_accepts_any_listed_role() {
        let trainer = principal(&[ROLE_TRAINER]);
        assert!(require_role(&trainer, &[ROLE_ADMIN, ROLE_TRAINER]).is_ok());
        let trainee = principal(&[ROLE_TRAINEE]);
        assert!(require_role(&trainee, &[ROLE_ADMIN, ROLE_TRAINER]).is_err());
        let nobody = principal(&[]);
        assert!(require_role(&nobody, &[ROLE_ADMIN, ROLE_TRAINER, ROLE_TRAINEE]).is_err());
    }

    #[test]
    fn principal_ids_include_self_and_parseable_groups() {
        let p = principal(&[ROLE_TRAINEE]);
        let ids = p.principal_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&p.object_id));
    }

    #[test]
    fn sessions_expire_strictly_after_their_deadline() {
        let now = Utc::now();
        let session = sessions::Model {
            id: Uuid::new_v4(),
            user_object_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            unique_name: "user@contoso.com".into(),
            display_name: None,
            roles: vec![],
            group_ids: vec![],
            refresh_token: None,
            created_at: now.into(),
            expires_at: (now + Duration::hours(1)).into(),
        };
        assert!(!session_expired(&session, now));
        assert!(session_expired(&session, now + Duration::hours(2)));
    }
}
