//! Migration: Create users, preferences, notifications and app_config tables.

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
                CREATE TABLE users (
                    id VARCHAR(40) PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    email VARCHAR(255) NOT NULL UNIQUE,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE TABLE user_preferences (
                    id SERIAL PRIMARY KEY,
                    user_id VARCHAR(40) NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                    notification_mode VARCHAR(40) NOT NULL DEFAULT 'USE_GLOBAL'
                        CHECK (notification_mode IN ('NONE', 'IN_APP', 'IN_APP_EMAIL_IMMEDIATE', 'IN_APP_EMAIL_DAILY', 'USE_GLOBAL'))
                );

                CREATE TABLE notifications (
                    id UUID PRIMARY KEY,
                    user_id VARCHAR(40) NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    notification_type VARCHAR(60) NOT NULL,
                    title VARCHAR(500) NOT NULL,
                    message TEXT NOT NULL,
                    related_entity_id VARCHAR(100),
                    related_entity_type VARCHAR(60),
                    data JSONB,
                    is_read BOOLEAN NOT NULL DEFAULT FALSE,
                    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                -- Unread inbox and digest lookups
                CREATE INDEX idx_notifications_unread ON notifications(user_id, created_at DESC)
                    WHERE is_read = FALSE AND is_deleted = FALSE;

                CREATE TABLE app_config (
                    key VARCHAR(100) PRIMARY KEY,
                    value JSONB NOT NULL
                );
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
                DROP TABLE IF EXISTS app_config CASCADE;
                DROP TABLE IF EXISTS notifications CASCADE;
                DROP TABLE IF EXISTS user_preferences CASCADE;
                DROP TABLE IF EXISTS users CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
