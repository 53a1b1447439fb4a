mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::PgTestDb;
use entity::organizations;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

async fn seed_org(
    db: &PgTestDb,
    issuer: &str,
    age_minutes: i64,
) -> Result<organizations::Model> {
    let model = organizations::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Contoso".to_string()),
        issuer: Set(issuer.to_string()),
        created_on: Set((Utc::now() - Duration::minutes(age_minutes)).into()),
    };
    Ok(model.insert(&db.conn).await?)
}

#[tokio::test]
async fn stale_unclaimed_signups_are_purged() -> Result<()> {
    let Some(db) = PgTestDb::new().await else {
        return Ok(());
    };

    // Unclaimed and past the ten-minute window.
    let stale = seed_org(&db, &Uuid::new_v4().to_string(), 11).await?;
    // Unclaimed but only five minutes old.
    let fresh = seed_org(&db, &Uuid::new_v4().to_string(), 5).await?;
    // Claimed long ago; age must not matter once the issuer is a URL.
    let claimed = seed_org(
        &db,
        "https://sts.windows.net/e91d47c4-76f3-4271-a796-2a5bd42d41b7/",
        600,
    )
    .await?;

    let purged = platform_db::purge_stale_signups(&db.conn, Utc::now()).await?;
    assert_eq!(purged, 1);

    let remaining: Vec<Uuid> = organizations::Entity::find()
        .all(&db.conn)
        .await?
        .into_iter()
        .map(|org| org.id)
        .collect();
    assert!(!remaining.contains(&stale.id));
    assert!(remaining.contains(&fresh.id));
    assert!(remaining.contains(&claimed.id));

    db.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn claiming_rewrites_the_marker_exactly_once() -> Result<()> {
    let Some(db) = PgTestDb::new().await else {
        return Ok(());
    };

    let marker = Uuid::new_v4().to_string();
    let org = seed_org(&db, &marker, 0).await?;
    assert!(!org.is_claimed());

    let found = platform_db::organization_by_marker(&db.conn, &marker).await?;
    assert_eq!(found.as_ref().map(|o| o.id), Some(org.id));

    let issuer = "https://sts.windows.net/e91d47c4-76f3-4271-a796-2a5bd42d41b7/".to_string();
    let claimed = platform_db::claim_organization(&db.conn, org, issuer.clone()).await?;
    assert!(claimed.is_claimed());
    assert_eq!(claimed.issuer, issuer);

    // The marker no longer resolves, so the consent callback cannot be replayed.
    let gone = platform_db::organization_by_marker(&db.conn, &marker).await?;
    assert!(gone.is_none());

    db.cleanup().await;
    Ok(())
}
