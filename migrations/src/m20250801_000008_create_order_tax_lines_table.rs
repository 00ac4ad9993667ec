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
                    .table(OrderTaxLines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderTaxLines::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderTaxLines::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderTaxLines::OrderItemId).uuid().null())
                    .col(ColumnDef::new(OrderTaxLines::Title).string().not_null())
                    .col(
                        ColumnDef::new(OrderTaxLines::Rate)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OrderTaxLines::Amount)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OrderTaxLines::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_tax_lines_order_id")
                            .from(OrderTaxLines::Table, OrderTaxLines::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_order_tax_lines_order_id")
                    .table(OrderTaxLines::Table)
                    .col(OrderTaxLines::OrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderTaxLines::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum OrderTaxLines {
    Table,
    Id,
    OrderId,
    OrderItemId,
    Title,
    Rate,
    Amount,
    CreatedAt,
}
