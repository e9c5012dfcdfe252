use anyhow::Context;
use stateset_checkout::{config, migrator};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // DATABASE_URL overrides the layered config
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            config::init_tracing(config::DEFAULT_LOG_LEVEL, false);
            url
        }
        _ => {
            let app_config = config::load_config().context("failed to load configuration")?;
            config::init_tracing(&app_config.log_level, app_config.log_json);
            app_config.database_url
        }
    };

    info!("Starting database migration");
    migrator::run_migration(&database_url).await?;
    info!("Migration completed successfully");

    Ok(())
}
