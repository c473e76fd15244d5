use anyhow::Result;
use axum::{
    extract::Extension,
    routing::{delete, get, post, put},
    Router,
};
use pixel_core::PixelContext;
use pixel_dispatch::Dispatcher;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing;

use crate::handlers;

pub async fn run(ctx: PixelContext) -> Result<()> {
    let api_port = ctx.config.server.api_port;
    let dispatcher = Arc::new(Dispatcher::new(ctx.clone())?);

    // Configure CORS - allow specific origins or all if CORS_ORIGINS not set
    let cors_layer = if let Ok(origins) = env::var("CORS_ORIGINS") {
        let origin_list: Vec<&str> = origins.split(',').map(|s| s.trim()).collect();
        let mut cors = CorsLayer::new();
        for origin in origin_list {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(true)
    } else {
        tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
        CorsLayer::permissive()
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/shops/:shop_id/pixels", get(handlers::list_pixels))
        .route("/api/v1/shops/:shop_id/pixels/:platform", put(handlers::upsert_pixel))
        .route("/api/v1/shops/:shop_id/pixels/:platform", delete(handlers::delete_pixel))
        .route("/api/v1/shops/:shop_id/pixels/test-event", post(handlers::send_test_event))
        .route("/api/v1/shops/:shop_id/pixel-logs", get(handlers::get_pixel_logs))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(ctx))
                .layer(Extension(dispatcher))
                .layer(cors_layer),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], api_port));
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
