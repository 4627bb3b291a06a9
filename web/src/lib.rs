use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use log::*;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

pub use self::error::{Error, Result};
pub use service::AppState;

mod controller;
mod error;
mod extractors;
mod middleware;
mod params;
pub mod router;
mod ws;

/// Binds the configured interface and serves the hub's HTTP and WebSocket routes
/// until `shutdown_signal` resolves.
///
/// Upgraded WebSocket connections are owned by the hub once established, so
/// returning from here does not close them; call `Hub::shutdown` afterwards.
pub async fn init_server(
    app_state: AppState,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let server_url = format!(
        "{}:{}",
        app_state.config.interface.as_deref().unwrap_or("127.0.0.1"),
        app_state.config.port
    );

    let listener = TcpListener::bind(&server_url).await?;
    info!("Server starting... listening for connections on http://{server_url}");

    let cors_layer = cors_layer(&app_state.config.allowed_origins);
    let router = router::define_routes(app_state).layer(cors_layer);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server stopped accepting connections");
    Ok(())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {origin}");
                None
            }
        })
        .collect();

    info!("CORS allowed origins: {allowed_origins:?}");

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true)
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_origin(origins)
}
