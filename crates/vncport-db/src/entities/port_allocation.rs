//! PortAllocation entity: one row per reserved key

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "port_allocations")]
pub struct Model {
    /// Store key, e.g. "vnc_port:8080"
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    /// Owning session identifier
    #[sea_orm(column_type = "Text")]
    pub value: String,

    /// Expiry as Unix epoch milliseconds, taken from the database clock
    ///
    /// Stored as an integer so that comparisons behave the same on every backend.
    pub expires_at_ms: i64,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
