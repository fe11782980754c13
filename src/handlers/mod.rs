// src/handlers/mod.rs
pub mod auth;
pub mod preview;
pub mod upgrade;

use actix_web::HttpResponse;

pub use preview::{create_preview, get_preview};
pub use upgrade::{
    create_upgrade_preview, get_analysis, get_suggestions, get_upgrade_preview, upload_image,
};

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "atelier",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
