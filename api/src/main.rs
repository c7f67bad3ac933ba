use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod error;
mod extract;
mod ledger;
mod middleware;
mod routes;
mod state;
mod store;

use config::{AppConfig, StoreBackend};
use store::{MemoryStore, PgStore, RecordStore};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Coachlog Training Ledger API",
        version = "0.1.0",
        description = "Exercise logs, workout and diet plans for students and their coaches."
    ),
    paths(
        routes::health::health_check,
        routes::logs::upsert_log,
        routes::logs::list_logs,
        routes::logs::delete_log,
        routes::plans::list_plans,
        routes::plans::create_plan,
        routes::plans::get_plan,
        routes::plans::update_plan,
        routes::plans::activate_plan,
        routes::plans::deactivate_plan,
        routes::workouts::list_blocks,
        routes::access::check_access,
    ),
    components(schemas(
        HealthResponse,
        coachlog_core::error::ApiError,
        coachlog_core::logs::WriterRole,
        coachlog_core::logs::ExerciseLog,
        coachlog_core::logs::UpsertLogRequest,
        coachlog_core::logs::UpsertLogResponse,
        coachlog_core::plans::PlanKind,
        coachlog_core::plans::Plan,
        coachlog_core::plans::CreatePlanRequest,
        coachlog_core::plans::UpdatePlanRequest,
        coachlog_core::blocks::BlockWorkout,
        coachlog_core::blocks::TrainingBlock,
        coachlog_core::access::AccessSignal,
        coachlog_core::access::AccessDecision,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn connect_store(config: &AppConfig) -> Arc<dyn RecordStore> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory record store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is validated by config");
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            Arc::new(PgStore::new(pool))
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coachlog_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let store = connect_store(&config).await;
    let identity: Arc<dyn auth::IdentityProvider> = Arc::new(auth::JwtIdentityProvider::new(
        &config.jwt_secret,
        &config.jwt_audience,
    ));
    let app_state = state::AppState::new(store, identity.clone());

    let cors_layer = middleware::cors::build_cors_layer(&config.cors_origins);

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::logs::read_router().layer(middleware::rate_limit::logs_read_layer()))
        .merge(routes::logs::write_router().layer(middleware::rate_limit::logs_write_layer()))
        .merge(routes::plans::router().layer(middleware::rate_limit::plans_layer()))
        .merge(routes::workouts::router().layer(middleware::rate_limit::plans_layer()))
        .merge(routes::access::router().layer(middleware::rate_limit::access_layer()))
        .layer(auth::InjectAuthLayer::new(identity))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(store = ?config.store, "Coachlog API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
