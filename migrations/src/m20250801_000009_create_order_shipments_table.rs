use sea_orm_migration::prelude::*;

use crate::m20250801_000005_create_orders_table::Orders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OrderShipments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderShipments::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderShipments::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderShipments::Provider).string().not_null())
                    .col(ColumnDef::new(OrderShipments::ServiceCode).string().null())
                    .col(ColumnDef::new(OrderShipments::ServiceName).string().null())
                    .col(
                        ColumnDef::new(OrderShipments::Status)
                            .string()
                            .not_null()
                            .default("unconfirmed"),
                    )
                    .col(
                        ColumnDef::new(OrderShipments::TrackingNumber)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OrderShipments::Amount)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(ColumnDef::new(OrderShipments::Payload).json().null())
                    .col(
                        ColumnDef::new(OrderShipments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OrderShipments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_shipments_order_id")
                            .from(OrderShipments::Table, OrderShipments::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_order_shipments_order_id")
                    .table(OrderShipments::Table)
                    .col(OrderShipments::OrderId)
                    .to_owned(),
            )
            .await?;

        // Webhook lookup path
        manager
            .create_index(
                Index::create()
                    .name("idx_order_shipments_tracking_number")
                    .table(OrderShipments::Table)
                    .col(OrderShipments::TrackingNumber)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderShipments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum OrderShipments {
    Table,
    Id,
    OrderId,
    Provider,
    ServiceCode,
    ServiceName,
    Status,
    TrackingNumber,
    Amount,
    Payload,
    CreatedAt,
    UpdatedAt,
}
