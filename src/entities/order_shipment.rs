use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shipment record for an order. Created unconfirmed at checkout; tracking
/// number and status arrive later through carrier webhooks. `payload` keeps
/// the raw provider data, with webhook deliveries merged under a
/// `last_webhook` key so history is preserved.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_shipments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    #[sea_orm(nullable)]
    pub service_code: Option<String>,
    #[sea_orm(nullable)]
    pub service_name: Option<String>,
    /// Provider status vocabulary, stored verbatim
    pub status: String,
    #[sea_orm(nullable)]
    pub tracking_number: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub amount: Option<Decimal>,
    #[sea_orm(column_type = "Json", nullable)]
    pub payload: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Initial status before any carrier confirmation arrives.
pub const STATUS_UNCONFIRMED: &str = "unconfirmed";
