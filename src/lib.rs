//! StateSet Checkout
//!
//! Order lifecycle and pricing core: inventory-safe checkout, promotion codes,
//! controlled order status changes and signed payment-gateway callbacks.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod actor;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod migrator;
pub mod money;
pub mod notifications;
pub mod repositories;
pub mod retry;
pub mod services;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::repositories::{DatabaseStore, Stores};
use crate::services::OrderOrchestrator;

/// A wired checkout core running against the configured database.
pub struct Checkout {
    pub orchestrator: OrderOrchestrator,
    pub stores: Stores,
    pub event_processor: JoinHandle<()>,
}

/// Connects to the database, applies migrations when enabled and wires the
/// orchestrator with an event consumer.
pub async fn bootstrap(config: &AppConfig) -> Result<Checkout, ServiceError> {
    metrics::register_metrics();

    let db = Arc::new(db::establish_connection_from_app_config(config).await?);
    if config.auto_migrate {
        if config.is_production() {
            warn!("auto_migrate is enabled in production");
        }
        db::run_migrations(&db).await?;
    }

    let stores = Stores::shared(Arc::new(DatabaseStore::new(db)));
    let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
    let event_processor = tokio::spawn(events::process_events(event_rx));

    let orchestrator =
        OrderOrchestrator::from_config(stores.clone(), config).with_event_sender(event_sender);

    info!(environment = %config.environment, "Checkout core ready");
    Ok(Checkout {
        orchestrator,
        stores,
        event_processor,
    })
}
