use std::net::SocketAddr;
use std::sync::Arc;

use keeper_api::app::{create_router, AppState};
use keeper_providers::gcp::GcpProvider;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    // Optional token override for local runs; on GCE the provider falls back
    // to the metadata server.
    let access_token = std::env::var("GCP_ACCESS_TOKEN").ok();
    let provider = Arc::new(GcpProvider::new(access_token));
    let state = AppState::new(provider);

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], keeper_port()));
    println!("Spot Keeper listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

fn keeper_port() -> u16 {
    std::env::var("KEEPER_PORT")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(8080)
}
