//! Link between two repository cases.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "repository_case_links")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub case_a_id: i32,
    pub case_b_id: i32,
    /// SAME_TEST_DIFFERENT_SOURCE links are the only ones that group forecasts
    pub link_type: String,
    pub is_deleted: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::repository_case::Entity",
        from = "Column::CaseAId",
        to = "super::repository_case::Column::Id",
        on_delete = "Cascade"
    )]
    CaseA,
    #[sea_orm(
        belongs_to = "super::repository_case::Entity",
        from = "Column::CaseBId",
        to = "super::repository_case::Column::Id",
        on_delete = "Cascade"
    )]
    CaseB,
}

impl ActiveModelBehavior for ActiveModel {}
