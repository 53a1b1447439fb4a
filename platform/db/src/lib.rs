//! Pool wiring plus the handful of queries shared between routes and tests.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectOptions, Database, DatabaseConnection,
    EntityTrait, QueryFilter, Set,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use entity::{access_control_entries, organizations, subscriptions, trainings};

/// Shared Postgres connection alias.
pub type DbPool = DatabaseConnection;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database url missing")]
    MissingUrl,
    #[error(transparent)]
    Orm(#[from] sea_orm::DbErr),
}

pub type DbResult<T> = Result<T, DbError>;

/// Environment-driven connection settings.
#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    env_key: String,
}

impl DatabaseSettings {
    pub fn from_env() -> Self {
        Self::new("DATABASE_URL")
    }

    pub fn new(env_key: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
        }
    }

    pub fn database_url(&self) -> DbResult<String> {
        std::env::var(&self.env_key).map_err(|_| DbError::MissingUrl)
    }
}

pub async fn connect(settings: &DatabaseSettings) -> DbResult<DbPool> {
    let url = settings.database_url()?;
    let mut options = ConnectOptions::new(url);
    options.sqlx_logging(false);
    Ok(Database::connect(options).await?)
}

/// Subscriptions connected by a given user (by UPN).
pub async fn subscriptions_connected_by(
    pool: &DbPool,
    connected_by: &str,
) -> DbResult<Vec<subscriptions::Model>> {
    Ok(subscriptions::Entity::find()
        .filter(subscriptions::Column::ConnectedBy.eq(connected_by))
        .all(pool)
        .await?)
}

/// Record a connected subscription unless it is already present.
pub async fn insert_subscription_if_absent(
    pool: &DbPool,
    id: Uuid,
    directory_id: Uuid,
    connected_by: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    if subscriptions::Entity::find_by_id(id).one(pool).await?.is_some() {
        return Ok(());
    }
    let model = subscriptions::ActiveModel {
        id: Set(id),
        directory_id: Set(directory_id),
        connected_on: Set(now.into()),
        connected_by: Set(connected_by.to_string()),
    };
    model.insert(pool).await?;
    info!(subscription = %id, "subscription connected");
    Ok(())
}

pub async fn delete_subscription(pool: &DbPool, id: Uuid) -> DbResult<()> {
    subscriptions::Entity::delete_by_id(id).exec(pool).await?;
    Ok(())
}

/// Look up a signup attempt by its state marker (the pre-consent issuer).
pub async fn organization_by_marker(
    pool: &DbPool,
    marker: &str,
) -> DbResult<Option<organizations::Model>> {
    Ok(organizations::Entity::find()
        .filter(organizations::Column::Issuer.eq(marker))
        .one(pool)
        .await?)
}

/// Flip an organization's issuer from its state marker to the tenant issuer
/// URL. This is the one and only transition the column ever makes.
pub async fn claim_organization(
    pool: &DbPool,
    org: organizations::Model,
    issuer: String,
) -> DbResult<organizations::Model> {
    info!(org = %org.id, %issuer, "organization claimed");
    let mut active: organizations::ActiveModel = org.into();
    active.issuer = Set(issuer);
    Ok(active.update(pool).await?)
}

/// Remove signup attempts that never completed admin consent: issuer still a
/// state marker (not `https...`) and older than ten minutes.
pub async fn purge_stale_signups(pool: &DbPool, now: DateTime<Utc>) -> DbResult<u64> {
    let cutoff = now - Duration::minutes(10);
    let result = organizations::Entity::delete_many()
        .filter(
            Condition::all()
                .add(organizations::Column::Issuer.not_like("https%"))
                .add(organizations::Column::CreatedOn.lt(cutoff)),
        )
        .exec(pool)
        .await?;
    Ok(result.rows_affected)
}

/// Trainings the principal may see: ones they created plus ones shared with
/// their objectId or any of their groups.
pub async fn trainings_visible_to(
    pool: &DbPool,
    user_object_id: Uuid,
    principal_ids: &[Uuid],
) -> DbResult<Vec<trainings::Model>> {
    let shared_ids: Vec<i32> = access_control_entries::Entity::find()
        .filter(
            access_control_entries::Column::PrincipalId.is_in(principal_ids.iter().copied()),
        )
        .all(pool)
        .await?
        .into_iter()
        .map(|ace| ace.training_id)
        .collect();
    Ok(trainings::Entity::find()
        .filter(
            Condition::any()
                .add(trainings::Column::Id.is_in(shared_ids))
                .add(trainings::Column::CreatedBy.eq(user_object_id)),
        )
        .all(pool)
        .await?)
}
