pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use services::BookingService;
use store::{InventoryStore, PgStore};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub service: BookingService,
    pub config: config::Config,
}

impl AppState {
    /// Подключается к Postgres, применяет миграции и собирает сервис поверх `PgStore`.
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database).await?;
        tracing::info!("Database connected");

        db.run_migrations().await?;

        Ok(Self::with_store(Arc::new(PgStore::new(&db)), config))
    }

    pub fn with_store(store: Arc<dyn InventoryStore>, config: config::Config) -> Arc<Self> {
        let service = BookingService::new(store, config.booking.clone());
        Arc::new(Self { service, config })
    }
}

/// Корневой роутер: служебные маршруты и API под `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat Reservation API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
