mod common;

use anyhow::Result;
use common::PgTestDb;
use entity::{access_control_entries, trainings};
use sea_orm::{ActiveModelTrait, NotSet, Set};
use uuid::Uuid;

async fn seed_training(db: &PgTestDb, name: &str, created_by: Uuid) -> Result<trainings::Model> {
    let model = trainings::ActiveModel {
        id: NotSet,
        name: Set(name.to_string()),
        description: Set(String::new()),
        created_by: Set(created_by),
        organization_id: Set(Uuid::new_v4()),
    };
    Ok(model.insert(&db.conn).await?)
}

async fn share_with(db: &PgTestDb, training_id: i32, principal_id: Uuid) -> Result<()> {
    let entry = access_control_entries::ActiveModel {
        id: NotSet,
        training_id: Set(training_id),
        principal_id: Set(principal_id),
    };
    entry.insert(&db.conn).await?;
    Ok(())
}

#[tokio::test]
async fn visibility_covers_own_direct_and_group_shares() -> Result<()> {
    let Some(db) = PgTestDb::new().await else {
        return Ok(());
    };

    let me = Uuid::new_v4();
    let my_group = Uuid::new_v4();
    let someone_else = Uuid::new_v4();

    let mine = seed_training(&db, "created by me", me).await?;
    let shared_direct = seed_training(&db, "shared with me", someone_else).await?;
    share_with(&db, shared_direct.id, me).await?;
    let shared_via_group = seed_training(&db, "shared with my group", someone_else).await?;
    share_with(&db, shared_via_group.id, my_group).await?;
    let unrelated = seed_training(&db, "not shared", someone_else).await?;

    let visible = platform_db::trainings_visible_to(&db.conn, me, &[my_group, me]).await?;
    let ids: Vec<i32> = visible.iter().map(|t| t.id).collect();
    assert!(ids.contains(&mine.id));
    assert!(ids.contains(&shared_direct.id));
    assert!(ids.contains(&shared_via_group.id));
    assert!(!ids.contains(&unrelated.id));

    db.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn deleting_a_training_cascades_to_its_entries() -> Result<()> {
    let Some(db) = PgTestDb::new().await else {
        return Ok(());
    };

    let creator = Uuid::new_v4();
    let sharee = Uuid::new_v4();
    let training = seed_training(&db, "doomed", creator).await?;
    share_with(&db, training.id, sharee).await?;

    use sea_orm::{ColumnTrait, EntityTrait, ModelTrait, QueryFilter};
    training.clone().delete(&db.conn).await?;
    let leftover = access_control_entries::Entity::find()
        .filter(access_control_entries::Column::PrincipalId.eq(sharee))
        .all(&db.conn)
        .await?;
    assert!(leftover.is_empty());

    // The sharee no longer sees anything.
    let visible = platform_db::trainings_visible_to(&db.conn, sharee, &[sharee]).await?;
    assert!(visible.is_empty());

    db.cleanup().await;
    Ok(())
}
