//! Migration: Create repository_cases and repository_case_links tables.
//!
//! Cases are owned by the CRUD application; the workers only maintain the
//! forecast columns.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE repository_cases (
                    id SERIAL PRIMARY KEY,
                    project_id INTEGER NOT NULL,
                    name VARCHAR(1000) NOT NULL,
                    source VARCHAR(20) NOT NULL DEFAULT 'MANUAL',

                    -- Maintained by the forecast worker
                    forecast_manual INTEGER,
                    forecast_automated DOUBLE PRECISION,

                    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    is_archived BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                -- Keyset scan used by group discovery (active only)
                CREATE INDEX idx_repository_cases_active ON repository_cases(id)
                    WHERE is_deleted = FALSE AND is_archived = FALSE;

                CREATE TABLE repository_case_links (
                    id SERIAL PRIMARY KEY,
                    case_a_id INTEGER NOT NULL REFERENCES repository_cases(id) ON DELETE CASCADE,
                    case_b_id INTEGER NOT NULL REFERENCES repository_cases(id) ON DELETE CASCADE,
                    link_type VARCHAR(40) NOT NULL,
                    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (case_a_id, case_b_id, link_type)
                );

                -- Links are followed in both directions
                CREATE INDEX idx_repository_case_links_case_a ON repository_case_links(case_a_id)
                    WHERE is_deleted = FALSE;
                CREATE INDEX idx_repository_case_links_case_b ON repository_case_links(case_b_id)
                    WHERE is_deleted = FALSE;
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DROP TABLE IF EXISTS repository_case_links CASCADE;
                DROP TABLE IF EXISTS repository_cases CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
