//! TestRunCase entity: a repository case scheduled inside a test run.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "test_run_cases")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub test_run_id: i32,
    pub repository_case_id: i32,
    /// Status system name; NULL or "untested" until executed
    pub status: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::test_run::Entity",
        from = "Column::TestRunId",
        to = "super::test_run::Column::Id",
        on_delete = "Cascade"
    )]
    TestRun,
    #[sea_orm(
        belongs_to = "super::repository_case::Entity",
        from = "Column::RepositoryCaseId",
        to = "super::repository_case::Column::Id",
        on_delete = "Cascade"
    )]
    RepositoryCase,
    #[sea_orm(has_many = "super::test_run_result::Entity")]
    Results,
}

impl Related<super::test_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestRun.def()
    }
}

impl Related<super::repository_case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RepositoryCase.def()
    }
}

impl Related<super::test_run_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Results.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
