use sea_orm_migration::prelude::*;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trainings (
    id serial PRIMARY KEY,
    name text NOT NULL,
    description text NOT NULL DEFAULT '',
    created_by uuid NOT NULL,
    organization_id uuid NOT NULL
);

CREATE TABLE IF NOT EXISTS access_control_entries (
    id serial PRIMARY KEY,
    training_id int NOT NULL REFERENCES trainings(id) ON DELETE CASCADE,
    principal_id uuid NOT NULL,
    UNIQUE (training_id, principal_id)
);

CREATE INDEX IF NOT EXISTS trainings_created_by_idx ON trainings (created_by);
CREATE INDEX IF NOT EXISTS ace_principal_idx ON access_control_entries (principal_id);
"#;

const DOWN_SQL: &str = r#"
DROP TABLE IF EXISTS access_control_entries;
DROP TABLE IF EXISTS trainings;
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
