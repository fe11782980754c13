// src/services/mod.rs
pub mod catalog;
pub mod color;
pub mod image_processor;
pub mod image_provider;
pub mod job_store;
pub mod memory_store;
pub mod preview_orchestrator;
pub mod prompt;
pub mod semantic;
pub mod storage;
pub mod upgrade_orchestrator;
pub mod vision;
pub mod worker;

pub use catalog::{CachedCatalog, CatalogStore, MemoryCatalogStore, RedisCatalogStore};
pub use image_processor::ImageProcessor;
pub use image_provider::{ImageGenerator, ImageProvider, ImageProviderRegistry};
pub use job_store::{JobStore, RedisJobStore};
pub use memory_store::MemoryJobStore;
pub use preview_orchestrator::{CreatePreviewRequest, PreviewOrchestrator, PreviewSettings};
pub use prompt::{PromptBuilder, PromptFormat};
pub use semantic::SemanticConfigBuilder;
pub use storage::{LocalObjectStorage, MemoryObjectStorage, ObjectStorage};
pub use upgrade_orchestrator::{CreateUpgradePreviewRequest, UpgradeOrchestrator, UploadedImage};
pub use vision::VisionAnalyzer;
pub use worker::{BackgroundWorker, JobProcessor};
