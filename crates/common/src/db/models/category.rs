//! Category entity: registry row plus its cached ranking

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "categories")]
pub struct Model {
    /// Category name without the namespace prefix
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub state: String,

    /// Ranked entries, present once the state is `ready`
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub result: Option<Json>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    /// Build task that owns (or last owned) this row
    pub task_id: Option<Uuid>,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
