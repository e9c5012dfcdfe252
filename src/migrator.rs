use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_stocks_table::Migration),
            Box::new(m20240101_000002_create_promotions_table::Migration),
            Box::new(m20240101_000003_create_orders_table::Migration),
            Box::new(m20240101_000004_create_order_details_table::Migration),
            Box::new(m20240101_000005_create_payment_callbacks_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_stocks_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_stocks_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Stocks::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Stocks::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Stocks::ProductId).uuid().not_null())
                        .col(ColumnDef::new(Stocks::ProductName).string().not_null())
                        .col(ColumnDef::new(Stocks::ColorName).string().not_null())
                        .col(
                            ColumnDef::new(Stocks::Quantity)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Stocks::Quantity).gte(0)),
                        )
                        .col(ColumnDef::new(Stocks::Price).decimal_len(19, 4).not_null())
                        .col(ColumnDef::new(Stocks::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stocks_product_color")
                        .table(Stocks::Table)
                        .col(Stocks::ProductId)
                        .col(Stocks::ColorName)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Stocks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Stocks {
        Table,
        Id,
        ProductId,
        ProductName,
        ColorName,
        Quantity,
        Price,
        UpdatedAt,
    }
}

mod m20240101_000002_create_promotions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_promotions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Promotions::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Promotions::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Promotions::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Promotions::PromotionType).string_len(32).not_null())
                        .col(ColumnDef::new(Promotions::Value).decimal_len(19, 4).not_null())
                        .col(ColumnDef::new(Promotions::MaxDiscountAmount).decimal_len(19, 4).null())
                        .col(ColumnDef::new(Promotions::MinOrderValue).decimal_len(19, 4).null())
                        .col(ColumnDef::new(Promotions::UsageLimit).integer().not_null())
                        .col(
                            ColumnDef::new(Promotions::UsageCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Promotions::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Promotions::StartDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Promotions::EndDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(
                            Expr::col(Promotions::UsageCount)
                                .lte(Expr::col(Promotions::UsageLimit)),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Promotions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Promotions {
        Table,
        Id,
        Code,
        PromotionType,
        Value,
        MaxDiscountAmount,
        MinOrderValue,
        UsageLimit,
        UsageCount,
        IsActive,
        StartDate,
        EndDate,
    }
}

mod m20240101_000003_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentType).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal_len(19, 4).not_null())
                        .col(
                            ColumnDef::new(Orders::ProductDiscount)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingDiscount)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::ShippingFee).decimal_len(19, 4).not_null())
                        .col(ColumnDef::new(Orders::FinalTotal).decimal_len(19, 4).not_null())
                        .col(ColumnDef::new(Orders::RecipientName).string().not_null())
                        .col(ColumnDef::new(Orders::RecipientPhone).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).text().not_null())
                        .col(ColumnDef::new(Orders::PromotionId).uuid().null())
                        .col(ColumnDef::new(Orders::PromotionCode).string_len(64).null())
                        .col(ColumnDef::new(Orders::CreatedBy).uuid().not_null())
                        .col(ColumnDef::new(Orders::ApprovedBy).uuid().null())
                        .col(ColumnDef::new(Orders::CancelReason).text().null())
                        .col(ColumnDef::new(Orders::PaymentTransactionRef).string().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_customer_id")
                        .table(Orders::Table)
                        .col(Orders::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        CustomerId,
        Status,
        PaymentType,
        Subtotal,
        ProductDiscount,
        ShippingDiscount,
        ShippingFee,
        FinalTotal,
        RecipientName,
        RecipientPhone,
        ShippingAddress,
        PromotionId,
        PromotionCode,
        CreatedBy,
        ApprovedBy,
        CancelReason,
        PaymentTransactionRef,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}

mod m20240101_000004_create_order_details_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_order_details_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderDetails::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderDetails::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderDetails::StockId).uuid().null())
                        .col(ColumnDef::new(OrderDetails::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderDetails::ProductName).string().not_null())
                        .col(ColumnDef::new(OrderDetails::ColorName).string().null())
                        .col(ColumnDef::new(OrderDetails::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderDetails::UnitPrice)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderDetails::PromotionId).uuid().null())
                        .col(
                            ColumnDef::new(OrderDetails::Reviewed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_details_order_id")
                                .from(OrderDetails::Table, OrderDetails::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_details_order_id")
                        .table(OrderDetails::Table)
                        .col(OrderDetails::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderDetails::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderDetails {
        Table,
        Id,
        OrderId,
        StockId,
        ProductId,
        ProductName,
        ColorName,
        Quantity,
        UnitPrice,
        PromotionId,
        Reviewed,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
    }
}

mod m20240101_000005_create_payment_callbacks_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_payment_callbacks_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentCallbacks::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentCallbacks::TransactionRef)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentCallbacks::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentCallbacks::Outcome)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentCallbacks::ProcessedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentCallbacks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentCallbacks {
        Table,
        TransactionRef,
        OrderId,
        Outcome,
        ProcessedAt,
    }
}

// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    let result = Migrator::up(&db, None).await;

    match result {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
