//! Migration: Create test runs and execution result tables.

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
                CREATE TABLE test_runs (
                    id SERIAL PRIMARY KEY,
                    project_id INTEGER NOT NULL,
                    name VARCHAR(1000) NOT NULL,
                    is_completed BOOLEAN NOT NULL DEFAULT FALSE,
                    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,

                    -- Aggregated over untested cases by the forecast worker
                    forecast_manual INTEGER,
                    forecast_automated DOUBLE PRECISION,

                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE TABLE test_run_cases (
                    id SERIAL PRIMARY KEY,
                    test_run_id INTEGER NOT NULL REFERENCES test_runs(id) ON DELETE CASCADE,
                    repository_case_id INTEGER NOT NULL REFERENCES repository_cases(id) ON DELETE CASCADE,
                    -- Status system name, NULL until a status is assigned
                    status VARCHAR(40),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (test_run_id, repository_case_id)
                );

                CREATE INDEX idx_test_run_cases_repository_case_id
                    ON test_run_cases(repository_case_id);

                CREATE TABLE test_run_results (
                    id SERIAL PRIMARY KEY,
                    test_run_case_id INTEGER NOT NULL REFERENCES test_run_cases(id) ON DELETE CASCADE,
                    status VARCHAR(40) NOT NULL,
                    elapsed INTEGER,
                    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                -- Only positive durations are forecast samples
                CREATE INDEX idx_test_run_results_samples ON test_run_results(test_run_case_id)
                    WHERE is_deleted = FALSE AND elapsed > 0;

                CREATE TABLE junit_test_results (
                    id SERIAL PRIMARY KEY,
                    repository_case_id INTEGER NOT NULL REFERENCES repository_cases(id) ON DELETE CASCADE,
                    test_run_id INTEGER REFERENCES test_runs(id) ON DELETE SET NULL,
                    result_type VARCHAR(20) NOT NULL,
                    time DOUBLE PRECISION,
                    executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX idx_junit_test_results_samples ON junit_test_results(repository_case_id)
                    WHERE time > 0;
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
                DROP TABLE IF EXISTS junit_test_results CASCADE;
                DROP TABLE IF EXISTS test_run_results CASCADE;
                DROP TABLE IF EXISTS test_run_cases CASCADE;
                DROP TABLE IF EXISTS test_runs CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
