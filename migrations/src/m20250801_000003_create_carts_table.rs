use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Carts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Carts::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Carts::SessionId).string().null())
                    .col(ColumnDef::new(Carts::CustomerId).uuid().null())
                    .col(ColumnDef::new(Carts::Currency).string_len(3).not_null())
                    .col(ColumnDef::new(Carts::DiscountId).uuid().null())
                    .col(ColumnDef::new(Carts::ShippingProvider).string().null())
                    .col(ColumnDef::new(Carts::ShippingServiceCode).string().null())
                    .col(ColumnDef::new(Carts::ShippingServiceName).string().null())
                    .col(
                        ColumnDef::new(Carts::ShippingAmount)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(ColumnDef::new(Carts::RateQuotes).json().null())
                    .col(ColumnDef::new(Carts::ShippingAddress).json().null())
                    .col(ColumnDef::new(Carts::BillingAddress).json().null())
                    .col(
                        ColumnDef::new(Carts::Subtotal)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Carts::DiscountTotal)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Carts::TaxTotal)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Carts::ShippingTotal)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Carts::GrandTotal)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Carts::Status)
                            .string_len(20)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Carts::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Carts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Carts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_carts_session_id")
                    .table(Carts::Table)
                    .col(Carts::SessionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_carts_customer_id")
                    .table(Carts::Table)
                    .col(Carts::CustomerId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Carts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Carts {
    Table,
    Id,
    SessionId,
    CustomerId,
    Currency,
    DiscountId,
    ShippingProvider,
    ShippingServiceCode,
    ShippingServiceName,
    ShippingAmount,
    RateQuotes,
    ShippingAddress,
    BillingAddress,
    Subtotal,
    DiscountTotal,
    TaxTotal,
    ShippingTotal,
    GrandTotal,
    Status,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}
