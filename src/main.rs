use book_rental_ddd::{
    adapters::{
        memory::{
            DescriptionProvider as InMemoryDescriptionProvider, RemoteStateStore as InMemoryStore,
        },
        postgres::PostgresRemoteStateStore,
    },
    api::{handlers::AppState, router::create_router},
    application::BookServices,
    config::{AppConfig, StoreBackend},
    ports::RemoteStateStore,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "book_rental_ddd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Initialize the remote state store
    let store: Arc<dyn RemoteStateStore> = match config.store_backend {
        StoreBackend::Postgres => {
            tracing::info!("Database URL: {}", config.database_url);

            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.database_url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            Arc::new(PostgresRemoteStateStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; state is lost on shutdown");
            Arc::new(InMemoryStore::new())
        }
    };

    // 書籍説明は外部コンテンツAPIの担当。未登録の書籍は「取得不可」として表示される
    let descriptions = Arc::new(InMemoryDescriptionProvider::new());

    let services = BookServices::new(store, descriptions, config.rental);

    // Create application state
    let app_state = Arc::new(AppState { services });

    // Create router
    let app = create_router(app_state);

    // Server configuration
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", addr);

    // Start server
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
