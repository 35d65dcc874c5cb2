//! Minimal HTTP wrapper around the rendering gateway.
//!
//! Serves static assets under `/public` and renders `pages/index.js` for
//! every request to `/`. Any render error maps to a generic 500; diagnostic
//! detail goes to the server log only.
//!
//! Run with: cargo run --example basic

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use ssr_gateway::{Gateway, Options};
use std::sync::Arc;
use tower_http::services::ServeDir;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let gateway = Arc::new(Gateway::with_options(Options {
        public_path: "/public".into(),
        source_dir: "demos/site".into(),
        ..Default::default()
    })?);

    let app = Router::new()
        .route("/", get(index))
        .nest_service("/public", ServeDir::new("demos/site/public"))
        .with_state(gateway);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
    tracing::info!("server running at http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(State(gateway): State<Arc<Gateway>>) -> Result<Html<String>, StatusCode> {
    let props = serde_json::json!({
        "title": "Gateway Example",
        "initialCount": 0,
    });

    match gateway.render("pages/index", props).await {
        Ok(html) => Ok(Html(html)),
        Err(err) => {
            tracing::error!(error = %err, "page render failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
