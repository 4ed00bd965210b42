use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use ridetrack::{
    AppState,
    config::{Config, StoreBackend},
    location::{
        LocationStore, MemoryChangeFeed, MemoryLocationRepository, PgLocationRepository,
        RedisChangeFeed,
    },
    rides::{MemoryRideRepository, PgRideRepository, RideRepository},
    routes,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    let (locations, rides): (LocationStore, Arc<dyn RideRepository>) = match config.store_backend {
        StoreBackend::Postgres => {
            // 设置数据库连接池
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        conn.execute("SET application_name = 'ridetrack';").await?;
                        Ok(())
                    })
                })
                .connect(&config.database_url)
                .await
                .expect("Failed to connect to Postgres");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            // 设置 Redis 客户端
            let redis_client =
                redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
            let feed = RedisChangeFeed::new(
                redis_client,
                config.feed_reconnect_initial(),
                config.feed_reconnect_max(),
            );

            (
                LocationStore::new(
                    Arc::new(PgLocationRepository::new(pool.clone())),
                    Arc::new(feed),
                ),
                Arc::new(PgRideRepository::new(pool)),
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Running with in-memory store, nothing will be persisted");
            (
                LocationStore::new(
                    Arc::new(MemoryLocationRepository::new()),
                    Arc::new(MemoryChangeFeed::new()),
                ),
                Arc::new(MemoryRideRepository::new()),
            )
        }
    };

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        locations,
        rides,
    };

    let router = routes::create_router(state.clone());

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router,
    )
    .await
    .expect("Failed to start server");
}
