//! Manual execution result for a test run case.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "test_run_results")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub test_run_case_id: i32,
    pub status: String,
    /// Time spent executing the case, in seconds
    pub elapsed: Option<i32>,
    pub is_deleted: bool,
    pub executed_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::test_run_case::Entity",
        from = "Column::TestRunCaseId",
        to = "super::test_run_case::Column::Id",
        on_delete = "Cascade"
    )]
    TestRunCase,
}

impl Related<super::test_run_case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestRunCase.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
