use sea_orm_migration::prelude::*;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id uuid PRIMARY KEY,
    name text NOT NULL,
    issuer text NOT NULL,
    created_on timestamptz NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id uuid PRIMARY KEY,
    directory_id uuid NOT NULL,
    connected_on timestamptz NOT NULL DEFAULT now(),
    connected_by text NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id uuid PRIMARY KEY,
    user_object_id uuid NOT NULL,
    tenant_id uuid NOT NULL,
    unique_name text NOT NULL,
    display_name text NULL,
    roles text[] NOT NULL DEFAULT '{}',
    group_ids text[] NOT NULL DEFAULT '{}',
    refresh_token text NULL,
    created_at timestamptz NOT NULL DEFAULT now(),
    expires_at timestamptz NOT NULL
);

CREATE INDEX IF NOT EXISTS subscriptions_connected_by_idx ON subscriptions (connected_by);
CREATE INDEX IF NOT EXISTS organizations_issuer_idx ON organizations (issuer);
"#;

const DOWN_SQL: &str = r#"
DROP TABLE IF EXISTS sessions;
DROP TABLE IF EXISTS subscriptions;
DROP TABLE IF EXISTS organizations;
"#;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(UP_SQL)
            .await
            .map(|_| ())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await
            .map(|_| ())
    }
}
