//! RepositoryCase entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "repository_cases")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,
    pub name: String,
    /// MANUAL, JUNIT, TESTNG, ... (see `models::CaseSource`)
    pub source: String,
    /// Expected manual execution time in whole seconds
    pub forecast_manual: Option<i32>,
    /// Expected automated execution time in seconds
    pub forecast_automated: Option<f64>,
    pub is_deleted: bool,
    pub is_archived: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::test_run_case::Entity")]
    TestRunCases,
    #[sea_orm(has_many = "super::junit_test_result::Entity")]
    JunitResults,
}

impl Related<super::test_run_case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestRunCases.def()
    }
}

impl Related<super::junit_test_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JunitResults.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
