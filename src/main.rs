use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use octobot_chat::handlers::{
    cancel_chat_handler, chat_handler, conversation_events_handler, get_conversation_handler,
    health_check, update_input_handler,
};
use octobot_chat::init::app_init;
use octobot_chat::storage::{get_preview_handler, remove_attachment_handler, upload_attachment_handler};
use octobot_chat::types::FileSize;
use octobot_chat::AppState;

fn create_app_router(state: Arc<AppState>, max_upload: FileSize, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/api/conversation", get(get_conversation_handler))
        .route("/api/conversation/events", get(conversation_events_handler))
        .route("/api/conversation/input", put(update_input_handler))
        .route("/api/chat", post(chat_handler).delete(cancel_chat_handler))
        .route(
            "/api/attachments",
            post(upload_attachment_handler).delete(remove_attachment_handler),
        )
        .route("/api/previews/{id}", get(get_preview_handler))
        .route("/health", get(health_check))
        // Multipart framing on top of the image itself.
        .layer(DefaultBodyLimit::max(
            usize::try_from(max_upload.as_bytes())
                .unwrap_or(usize::MAX)
                .saturating_add(64 * 1024),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting Octobot chat server...");
    dotenv::dotenv().ok();
    let (config, state) = app_init().await?;
    log::info!("✅ Application state initialized");
    let app = create_app_router(state, config.max_upload, config.static_dir.as_deref());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("");
    log::info!("🎉 Server started!");
    log::info!("📍 http://{}", addr);
    log::info!("💬 Chat: http://{}/api/chat", addr);
    log::info!("📡 Events: http://{}/api/conversation/events", addr);
    log::info!("🖼️  Attachments: http://{}/api/attachments", addr);
    log::info!("❤️  Health: http://{}/health", addr);
    log::info!("📦 Max upload: {}", config.max_upload);
    if let Some(dir) = &config.static_dir {
        log::info!("🗂️  Static: {}", dir.display());
    }
    log::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
