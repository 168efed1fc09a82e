//! Imported automated (JUnit-family) result for a repository case.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "junit_test_results")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub repository_case_id: i32,
    pub test_run_id: Option<i32>,
    pub result_type: String,
    /// Reported duration in seconds
    pub time: Option<f64>,
    pub executed_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::repository_case::Entity",
        from = "Column::RepositoryCaseId",
        to = "super::repository_case::Column::Id",
        on_delete = "Cascade"
    )]
    RepositoryCase,
}

impl Related<super::repository_case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RepositoryCase.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
