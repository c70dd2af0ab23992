//! Application startup and lifecycle management.

use crate::config::Config;
use crate::handlers;
use crate::services::{DarajaClient, PaymentRepository, ReconciliationSweep, Reconciler};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: mongodb::Database,
    pub config: Config,
    pub repository: PaymentRepository,
    pub daraja: DarajaClient,
    pub reconciler: Reconciler,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some(config.service_name.clone());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.database.db_name);

        let repository = PaymentRepository::new(&db);
        repository.init_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::DatabaseError(e)
        })?;

        let daraja = DarajaClient::new(config.mpesa.clone());
        if daraja.is_configured() {
            tracing::info!("M-Pesa Daraja client initialized");
        } else {
            tracing::warn!("M-Pesa credentials not configured - payment initiation will fail");
        }

        let reconciler = Reconciler::new(repository.clone());

        let state = AppState {
            db,
            config: config.clone(),
            repository,
            daraja,
            reconciler,
        };

        // Port 0 = random port for testing.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Payments service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &mongodb::Database {
        &self.state.db
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    ///
    /// Starts the reconciliation sweep (when enabled) alongside the HTTP
    /// server.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let state = self.state.clone();

        if state.config.sweep.enabled {
            ReconciliationSweep::new(
                state.repository.clone(),
                state.daraja.clone(),
                state.reconciler.clone(),
                state.config.sweep.clone(),
            )
            .spawn();
            tracing::info!(
                interval_seconds = state.config.sweep.interval_seconds,
                "Reconciliation sweep started"
            );
        }

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            // Payment endpoints
            .route(
                "/payments/mpesa/initiate",
                post(handlers::payments::initiate_mpesa_payment),
            )
            // Public: invoked by the gateway, not by clients.
            .route(
                "/payments/mpesa/callback",
                post(handlers::payments::mpesa_callback),
            )
            .route("/payments/payment/:id", get(handlers::payments::get_payment))
            .route(
                "/payments/patient/:patient_id",
                get(handlers::payments::patient_payments),
            )
            .route(
                "/payments/status/:payment_id",
                get(handlers::payments::check_payment_status),
            )
            // Invoice endpoints
            .route("/invoices", post(handlers::invoices::create_invoice))
            .route("/invoices/:id", get(handlers::invoices::get_invoice))
            .route(
                "/invoices/patient/:patient_id",
                get(handlers::invoices::patient_invoices),
            )
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        axum::serve(self.listener, router).await
    }
}
