use crate::entities::{order, order_address, order_item, order_shipment, order_tax_line, payment};
use crate::errors::ServiceError;
use crate::services::ShopperIdentity;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Full order graph as persisted at confirmation plus everything appended
/// since.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub addresses: Vec<order_address::Model>,
    pub tax_lines: Vec<order_tax_line::Model>,
    pub shipments: Vec<order_shipment::Model>,
    pub payments: Vec<payment::Model>,
}

/// Read-only order queries. Orders are immutable snapshots; all writes go
/// through checkout and reconciliation.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        self.load_graph(order).await
    }

    #[instrument(skip(self))]
    pub async fn get_by_number(&self, order_number: &str) -> Result<OrderDetails, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", order_number))
            })?;
        self.load_graph(order).await
    }

    /// Lists the identity's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_identity(
        &self,
        identity: &ShopperIdentity,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let query = order::Entity::find();
        let query = match identity {
            ShopperIdentity::Customer(id) => query.filter(order::Column::CustomerId.eq(*id)),
            ShopperIdentity::Guest(session) => {
                query.filter(order::Column::SessionId.eq(session.as_str()))
            }
        };
        Ok(query
            .order_by_desc(order::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(self.db.as_ref())
            .await?)
    }

    async fn load_graph(&self, order: order::Model) -> Result<OrderDetails, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(self.db.as_ref())
            .await?;
        let addresses = order_address::Entity::find()
            .filter(order_address::Column::OrderId.eq(order.id))
            .all(self.db.as_ref())
            .await?;
        let tax_lines = order_tax_line::Entity::find()
            .filter(order_tax_line::Column::OrderId.eq(order.id))
            .all(self.db.as_ref())
            .await?;
        let shipments = order_shipment::Entity::find()
            .filter(order_shipment::Column::OrderId.eq(order.id))
            .order_by_desc(order_shipment::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        let payments = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .order_by_desc(payment::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        Ok(OrderDetails {
            order,
            items,
            addresses,
            tax_lines,
            shipments,
            payments,
        })
    }
}
