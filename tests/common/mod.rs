// Shared wiring for the HTTP tests: memory stores and offline providers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use atelier::AppState;
use atelier::models::CatalogSeed;
use atelier::services::image_provider::DryrunImageProvider;
use atelier::services::vision::DryrunVisionAnalyzer;
use atelier::services::*;
use uuid::Uuid;

pub struct TestContext {
    pub state: AppState,
    pub jobs: Arc<MemoryJobStore>,
    pub storage: Arc<MemoryObjectStorage>,
    pub public_configuration_id: Uuid,
    pub private_configuration_id: Uuid,
    pub owner_id: Uuid,
}

/// Rose gold halo ring with an oval diamond and six sapphires, once without
/// an owner and once owned by `owner_id`.
pub fn catalog_seed(public_id: Uuid, private_id: Uuid, owner_id: Uuid) -> CatalogSeed {
    let configuration = |id: Uuid, owner: Option<Uuid>| {
        serde_json::json!({
            "id": id,
            "owner_user_id": owner,
            "base_model_id": 10,
            "material_id": 3,
            "engraving_text": "Always",
            "stones": [
                { "stone_type_id": 1, "color_hex": "#FFFFFF", "carat": 1.2,
                  "shape": "Oval", "placement_index": 0 },
                { "stone_type_id": 2, "color_hex": "#0F52BA", "carat": 0.05,
                  "placement_index": 1, "quantity": 6 }
            ]
        })
    };

    serde_json::from_value(serde_json::json!({
        "categories": [{ "id": 1, "name": "Ring" }],
        "base_models": [{
            "id": 10,
            "category_id": 1,
            "name": "Halo Ring",
            "description": "Center stone framed by a halo",
            "metadata_json": "{\"aiDescription\":\"a halo engagement ring\"}"
        }],
        "materials": [{
            "id": 3,
            "name": "18K Rose Gold",
            "metal_type": "gold",
            "purity": "18K",
            "color_hex": "#B76E79"
        }],
        "stone_types": [
            { "id": 1, "name": "Diamond", "code": "DIA" },
            { "id": 2, "name": "Sapphire", "code": "SAP" }
        ],
        "configurations": [
            configuration(public_id, None),
            configuration(private_id, Some(owner_id))
        ]
    }))
    .expect("seed JSON matches the catalog schema")
}

pub async fn test_context(guest_preview_limit: u32) -> TestContext {
    let public_configuration_id = Uuid::new_v4();
    let private_configuration_id = Uuid::new_v4();
    let owner_id = Uuid::new_v4();

    let catalog = MemoryCatalogStore::new();
    catalog
        .load(catalog_seed(
            public_configuration_id,
            private_configuration_id,
            owner_id,
        ))
        .await;

    let jobs = Arc::new(MemoryJobStore::new());
    let storage = Arc::new(MemoryObjectStorage::new("http://media.test"));
    let prompts = PromptBuilder::default();
    let generator = Arc::new(ImageGenerator::new(
        Arc::new(DryrunImageProvider::new()),
        storage.clone(),
        prompts,
    ));

    let preview = Arc::new(PreviewOrchestrator::new(
        jobs.clone(),
        SemanticConfigBuilder::new(Arc::new(catalog)),
        prompts,
        generator.clone(),
        PreviewSettings {
            guest_preview_limit,
            ..PreviewSettings::default()
        },
    ));
    let upgrade = Arc::new(UpgradeOrchestrator::new(
        jobs.clone(),
        storage.clone(),
        ImageProcessor::new(10 * 1024 * 1024),
        Arc::new(DryrunVisionAnalyzer),
        generator,
        prompts,
        Duration::from_secs(30),
    ));

    TestContext {
        state: AppState {
            preview,
            upgrade,
            expose_error_details: true,
        },
        jobs,
        storage,
        public_configuration_id,
        private_configuration_id,
        owner_id,
    }
}
