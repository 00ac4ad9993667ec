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
                    .table(OrderAddresses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderAddresses::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderAddresses::OrderId).uuid().not_null())
                    .col(
                        ColumnDef::new(OrderAddresses::Kind)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderAddresses::Name).string().not_null())
                    .col(ColumnDef::new(OrderAddresses::Phone).string().null())
                    .col(
                        ColumnDef::new(OrderAddresses::Country)
                            .string_len(2)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderAddresses::City).string().not_null())
                    .col(ColumnDef::new(OrderAddresses::District).string().null())
                    .col(ColumnDef::new(OrderAddresses::PostalCode).string().null())
                    .col(ColumnDef::new(OrderAddresses::Line1).string().not_null())
                    .col(ColumnDef::new(OrderAddresses::Line2).string().null())
                    .col(
                        ColumnDef::new(OrderAddresses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_addresses_order_id")
                            .from(OrderAddresses::Table, OrderAddresses::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_order_addresses_order_id")
                    .table(OrderAddresses::Table)
                    .col(OrderAddresses::OrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderAddresses::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum OrderAddresses {
    Table,
    Id,
    OrderId,
    Kind,
    Name,
    Phone,
    Country,
    City,
    District,
    PostalCode,
    Line1,
    Line2,
    CreatedAt,
}
