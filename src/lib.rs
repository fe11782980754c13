// src/lib.rs
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;

use actix_web::web;

use crate::errors::AtelierError;
use crate::handlers::{
    create_preview, create_upgrade_preview, get_analysis, get_preview, get_suggestions,
    get_upgrade_preview, health_check, upload_image,
};
use crate::services::{PreviewOrchestrator, UpgradeOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub preview: Arc<PreviewOrchestrator>,
    pub upgrade: Arc<UpgradeOrchestrator>,
    /// Show raw failure reasons on failed jobs and analyses.
    pub expose_error_details: bool,
}

/// Route table shared by the binary and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    // Malformed bodies and ids get the same error envelope as everything else.
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AtelierError::Validation(format!("Invalid request body: {}", err)).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        AtelierError::Validation(format!("Invalid path: {}", err)).into()
    }))
    .service(
        web::scope("/ai")
            .route("/preview", web::post().to(create_preview))
            .route("/preview/{id}", web::get().to(get_preview)),
    )
    .service(
        web::scope("/upgrade")
            .route("/upload", web::post().to(upload_image))
            .route("/analysis/{id}", web::get().to(get_analysis))
            .route("/suggestions/{id}", web::get().to(get_suggestions))
            .route("/preview", web::post().to(create_upgrade_preview))
            .route("/preview/{id}", web::get().to(get_upgrade_preview)),
    )
    .route("/health", web::get().to(health_check));
}
