// src/main.rs
use std::sync::Arc;

use actix_web::{App, HttpServer, middleware, web};
use anyhow::Context;
use log::{info, warn};
use reqwest::Client;
use tokio::sync::watch;

use atelier::config::AppConfig;
use atelier::models::CatalogSeed;
use atelier::services::image_provider::{
    DryrunImageProvider, OpenAiImageProvider, StabilityImageProvider, http_client,
};
use atelier::services::vision::{
    AnthropicVisionAnalyzer, DryrunVisionAnalyzer, OpenAiVisionAnalyzer,
};
use atelier::services::*;
use atelier::{AppState, configure};

fn image_providers(config: &AppConfig, client: &Client) -> ImageProviderRegistry {
    let mut registry = ImageProviderRegistry::new();
    registry.register(DryrunImageProvider::new());
    if let Some(key) = &config.openai_api_key {
        registry.register(OpenAiImageProvider::new(
            client.clone(),
            key.clone(),
            config.openai_image_model.clone(),
        ));
    }
    if let Some(key) = &config.stability_api_key {
        registry.register(StabilityImageProvider::new(
            client.clone(),
            key.clone(),
            config.stability_api_base.clone(),
        ));
    }
    registry
}

fn vision_analyzer(config: &AppConfig, client: &Client) -> anyhow::Result<Arc<dyn VisionAnalyzer>> {
    let analyzer: Arc<dyn VisionAnalyzer> = match config.vision_provider.as_str() {
        "openai" => {
            let key = config
                .openai_api_key
                .clone()
                .context("VISION_PROVIDER=openai requires OPENAI_API_KEY")?;
            Arc::new(OpenAiVisionAnalyzer::new(
                client.clone(),
                key,
                config.openai_vision_model.clone(),
            ))
        }
        "anthropic" => {
            let key = config
                .anthropic_api_key
                .clone()
                .context("VISION_PROVIDER=anthropic requires ANTHROPIC_API_KEY")?;
            Arc::new(AnthropicVisionAnalyzer::new(
                client.clone(),
                key,
                config.anthropic_model.clone(),
            ))
        }
        "dryrun" => Arc::new(DryrunVisionAnalyzer),
        other => anyhow::bail!("Unknown VISION_PROVIDER '{}'", other),
    };
    Ok(analyzer)
}

async fn catalog(
    config: &AppConfig,
    jobs: &RedisJobStore,
) -> anyhow::Result<Arc<dyn CatalogStore>> {
    let store = RedisCatalogStore::new(jobs.connection());
    if let Some(path) = &config.catalog_seed_path {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading catalog seed {}", path.display()))?;
        let seed: CatalogSeed = serde_json::from_str(&raw)
            .with_context(|| format!("parsing catalog seed {}", path.display()))?;
        let rows = store.load(&seed).await?;
        info!("Loaded {} catalog rows from {}", rows, path.display());
    }
    Ok(Arc::new(CachedCatalog::new(
        Arc::new(store),
        config.catalog_cache_ttl,
    )))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting atelier v{}", env!("CARGO_PKG_VERSION"));
    let config = AppConfig::from_env();
    info!(
        "Image provider: {}, vision provider: {}, guest limit: {}",
        config.image_provider, config.vision_provider, config.guest_preview_limit
    );
    if config.production && config.expose_error_details {
        warn!("EXPOSE_ERROR_DETAILS is on in production");
    }

    let jobs = Arc::new(
        RedisJobStore::connect(&config.redis_url)
            .await
            .context("connecting to Redis")?,
    );
    let catalog = catalog(&config, &jobs).await?;
    let storage: Arc<dyn ObjectStorage> = Arc::new(
        LocalObjectStorage::new(config.storage_root.clone(), config.public_base_url.clone())
            .await?,
    );

    let client = http_client(config.provider_timeout)?;
    let registry = image_providers(&config, &client);
    let provider = registry.get(&config.image_provider)?;
    let vision = vision_analyzer(&config, &client)?;

    let prompts = PromptBuilder::new(config.prompt_format);
    let generator = Arc::new(ImageGenerator::new(provider, storage.clone(), prompts));

    let preview = Arc::new(PreviewOrchestrator::new(
        jobs.clone(),
        SemanticConfigBuilder::new(catalog),
        prompts,
        generator.clone(),
        PreviewSettings {
            guest_preview_limit: config.guest_preview_limit,
            default_frame_count: config.default_frame_count,
            max_frame_count: config.max_frame_count,
            job_timeout: config.job_timeout,
        },
    ));
    let upgrade = Arc::new(UpgradeOrchestrator::new(
        jobs.clone(),
        storage,
        ImageProcessor::new(config.max_upload_bytes),
        vision,
        generator,
        prompts,
        config.job_timeout,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = vec![
        tokio::spawn(
            BackgroundWorker::new(preview.clone(), config.worker_poll_interval)
                .run(shutdown_rx.clone()),
        ),
        tokio::spawn(
            BackgroundWorker::new(upgrade.clone(), config.worker_poll_interval)
                .run(shutdown_rx),
        ),
    ];

    let state = AppState {
        preview,
        upgrade,
        expose_error_details: config.expose_error_details,
    };
    let media_root = config.storage_root.clone();

    info!("Starting HTTP server on {}", config.http_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .configure(configure)
            .service(actix_files::Files::new("/media", media_root.clone()))
    })
    .bind(config.http_addr)?
    .run()
    .await?;

    info!("HTTP server stopped, waiting for workers");
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            warn!("Worker task ended abnormally: {}", e);
        }
    }

    Ok(())
}
