//! In-process upstream servers for gateway tests.

#![allow(dead_code)]

use axum::Router;
use popframe_core::GatewayConfig;

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("upstream server");
    });
    format!("http://{}", addr)
}

/// Gateway configuration pointing both services at local servers.
pub fn gateway_config(urban: &str, transport: &str) -> GatewayConfig {
    GatewayConfig {
        urban_api_url: urban.to_string(),
        transport_api_url: transport.to_string(),
        ..Default::default()
    }
}
