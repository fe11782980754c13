// src/services/semantic.rs
//! Expands a configuration's catalog references into readable descriptions.

use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::CatalogStore;
use super::color::{describe_hex, metal_phrase, stone_name_for_code};
use crate::errors::AtelierError;
use crate::models::BaseModelMetadata;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedDescription {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticBaseModel {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BaseModelMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticMaterial {
    pub name: String,
    pub description: String,
    pub metal_type: String,
    #[serde(default)]
    pub purity: Option<String>,
    #[serde(default)]
    pub color_hex: Option<String>,
    #[serde(default)]
    pub color_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticStone {
    /// Singular natural-language stone name, e.g. "sapphire".
    pub name: String,
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub color_hex: Option<String>,
    #[serde(default)]
    pub color_description: Option<String>,
    pub carat: f64,
    #[serde(default)]
    pub shape: Option<String>,
    pub placement_index: u32,
    pub quantity: u32,
}

/// Human-readable expansion of a configuration, embedded in each job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticConfiguration {
    pub configuration_id: Uuid,
    pub category: NamedDescription,
    pub base_model: SemanticBaseModel,
    pub material: SemanticMaterial,
    /// Ordered by placement index.
    pub stones: Vec<SemanticStone>,
    #[serde(default)]
    pub engraving_text: Option<String>,
}

impl SemanticConfiguration {
    /// Stone phrases grouped by type and colour, heaviest group first.
    pub fn stone_summary(&self) -> Vec<String> {
        let mut groups = group_stones(&self.stones);
        groups.sort_by(|a, b| {
            b.total_carat
                .partial_cmp(&a.total_carat)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.first_placement.cmp(&b.first_placement))
        });
        groups.iter().map(StoneGroup::phrase).collect()
    }

    /// The stone in the lowest placement slot, if any.
    pub fn center_stone(&self) -> Option<&SemanticStone> {
        self.stones.iter().min_by_key(|s| s.placement_index)
    }
}

/// Stones of one type and colour.
#[derive(Debug, Clone, PartialEq)]
pub struct StoneGroup {
    pub name: String,
    pub color: Option<String>,
    pub quantity: u32,
    pub total_carat: f64,
    pub first_placement: u32,
}

impl StoneGroup {
    pub fn phrase(&self) -> String {
        let noun = match &self.color {
            Some(color) => format!("{} {}", color, self.name),
            None => self.name.clone(),
        };
        if self.quantity > 1 {
            let (adjectives, last) = match noun.rsplit_once(' ') {
                Some((head, tail)) => (format!("{} ", head), tail.to_string()),
                None => (String::new(), noun.clone()),
            };
            format!("{} {}{}", self.quantity, adjectives, pluralize(&last))
        } else {
            format!("{} {}", indefinite_article(&noun), noun)
        }
    }
}

/// Groups stones by (name, colour), keeping the order of first appearance.
pub fn group_stones(stones: &[SemanticStone]) -> Vec<StoneGroup> {
    let mut groups: Vec<StoneGroup> = Vec::new();
    for stone in stones {
        let quantity = stone.quantity.max(1);
        match groups
            .iter_mut()
            .find(|g| g.name == stone.name && g.color == stone.color_description)
        {
            Some(group) => {
                group.quantity += quantity;
                group.total_carat += stone.carat * quantity as f64;
                group.first_placement = group.first_placement.min(stone.placement_index);
            }
            None => groups.push(StoneGroup {
                name: stone.name.clone(),
                color: stone.color_description.clone(),
                quantity,
                total_carat: stone.carat * quantity as f64,
                first_placement: stone.placement_index,
            }),
        }
    }
    groups
}

pub fn pluralize(noun: &str) -> String {
    let lower = noun.to_lowercase();
    if lower.ends_with('y')
        && !matches!(lower.chars().rev().nth(1), Some('a' | 'e' | 'i' | 'o' | 'u'))
    {
        format!("{}ies", &noun[..noun.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|end| lower.ends_with(end)) {
        format!("{}es", noun)
    } else {
        format!("{}s", noun)
    }
}

pub(crate) fn indefinite_article(phrase: &str) -> &'static str {
    let phrase = phrase.trim_start();
    // "an 18k", "an 8mm"
    if phrase.starts_with('8') || phrase.starts_with("11") || phrase.starts_with("18") {
        return "an";
    }
    match phrase.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

fn fallback_description(name: &str, description: Option<&str>) -> String {
    description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string())
}

pub struct SemanticConfigBuilder {
    catalog: Arc<dyn CatalogStore>,
}

impl SemanticConfigBuilder {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    pub async fn build(
        &self,
        configuration_id: Uuid,
        requester: Option<Uuid>,
    ) -> Result<SemanticConfiguration, AtelierError> {
        let configuration = self
            .catalog
            .configuration(configuration_id)
            .await?
            .ok_or_else(|| AtelierError::NotFound(format!("Configuration {}", configuration_id)))?;
        configuration.ensure_accessible_by(requester)?;

        let base_model = self
            .catalog
            .base_model(configuration.base_model_id)
            .await?
            .ok_or_else(|| {
                AtelierError::NotFound(format!("Base model {}", configuration.base_model_id))
            })?;
        let category = self
            .catalog
            .category(base_model.category_id)
            .await?
            .ok_or_else(|| AtelierError::NotFound(format!("Category {}", base_model.category_id)))?;
        let material = self
            .catalog
            .material(configuration.material_id)
            .await?
            .ok_or_else(|| {
                AtelierError::NotFound(format!("Material {}", configuration.material_id))
            })?;

        let metadata = match base_model.metadata_json.as_deref() {
            Some(raw) => match BaseModelMetadata::parse(raw) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(
                        "Ignoring malformed metadata on base model {}: {}",
                        base_model.id, e
                    );
                    None
                }
            },
            None => None,
        };

        let mut placed = configuration.stones.clone();
        placed.sort_by_key(|s| s.placement_index);

        let mut stones = Vec::with_capacity(placed.len());
        for stone in placed {
            let stone_type = self.catalog.stone_type(stone.stone_type_id).await?;
            let (name, code) = match &stone_type {
                Some(t) => (
                    stone_name_for_code(&t.code)
                        .map(str::to_string)
                        .unwrap_or_else(|| t.name.trim().to_lowercase()),
                    t.code.clone(),
                ),
                None => {
                    warn!(
                        "Configuration {} references unknown stone type {}",
                        configuration.id, stone.stone_type_id
                    );
                    ("gemstone".to_string(), String::new())
                }
            };

            let color_description = stone
                .color_hex
                .as_deref()
                .and_then(describe_hex)
                .map(str::to_string);

            let mut parts = Vec::new();
            if stone.carat > 0.0 {
                parts.push(format!("{:.2} ct", stone.carat));
            }
            if let Some(shape) = stone.shape.as_deref().filter(|s| !s.trim().is_empty()) {
                parts.push(shape.trim().to_lowercase());
            }
            if let Some(color) = &color_description {
                parts.push(color.clone());
            }
            parts.push(name.clone());

            stones.push(SemanticStone {
                name,
                code,
                description: parts.join(" "),
                color_hex: stone.color_hex.clone(),
                color_description,
                carat: stone.carat,
                shape: stone.shape.clone(),
                placement_index: stone.placement_index,
                quantity: stone.quantity.max(1),
            });
        }

        let ai_description = metadata
            .as_ref()
            .and_then(|m| m.ai_description.clone())
            .filter(|d| !d.trim().is_empty());

        Ok(SemanticConfiguration {
            configuration_id: configuration.id,
            category: NamedDescription {
                description: fallback_description(&category.name, category.description.as_deref()),
                name: category.name,
            },
            base_model: SemanticBaseModel {
                description: fallback_description(
                    &base_model.name,
                    base_model.description.as_deref(),
                ),
                name: base_model.name,
                ai_description,
                metadata,
            },
            material: SemanticMaterial {
                description: metal_phrase(
                    &material.metal_type,
                    material.purity.as_deref(),
                    material.color_hex.as_deref(),
                ),
                color_description: material
                    .color_hex
                    .as_deref()
                    .and_then(describe_hex)
                    .map(str::to_string),
                name: material.name,
                metal_type: material.metal_type,
                purity: material.purity,
                color_hex: material.color_hex,
            },
            stones,
            engraving_text: configuration
                .engraving_text
                .filter(|text| !text.trim().is_empty()),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::*;
    use crate::services::catalog::MemoryCatalogStore;
    use chrono::Utc;

    pub(crate) fn sample_seed(configuration_id: Uuid, owner: Option<Uuid>) -> CatalogSeed {
        CatalogSeed {
            categories: vec![Category {
                id: 1,
                name: "Ring".into(),
                description: Some("Finger ring".into()),
            }],
            base_models: vec![BaseModel {
                id: 10,
                category_id: 1,
                name: "Halo Ring".into(),
                description: Some("Center stone framed by a halo of accents".into()),
                base_price: 1200.0,
                metadata_json: Some(
                    r#"{"style":"classic","aiDescription":"a halo engagement ring"}"#.into(),
                ),
            }],
            materials: vec![Material {
                id: 3,
                name: "18K Rose Gold".into(),
                metal_type: "gold".into(),
                purity: Some("18K".into()),
                color_hex: Some("#B76E79".into()),
            }],
            stone_types: vec![
                StoneType {
                    id: 1,
                    name: "Diamond".into(),
                    code: "DIA".into(),
                    description: None,
                },
                StoneType {
                    id: 2,
                    name: "Sapphire".into(),
                    code: "SAP".into(),
                    description: None,
                },
            ],
            configurations: vec![Configuration {
                id: configuration_id,
                owner_user_id: owner,
                base_model_id: 10,
                material_id: 3,
                engraving_text: Some("Forever".into()),
                stones: vec![
                    ConfigurationStone {
                        stone_type_id: 2,
                        color_hex: Some("#0F52BA".into()),
                        carat: 0.1,
                        shape: Some("Round".into()),
                        placement_index: 2,
                        quantity: 6,
                    },
                    ConfigurationStone {
                        stone_type_id: 1,
                        color_hex: Some("#FFFFFF".into()),
                        carat: 1.5,
                        shape: Some("Oval".into()),
                        placement_index: 0,
                        quantity: 1,
                    },
                ],
                created_at: Utc::now(),
            }],
        }
    }

    async fn builder_with(seed: CatalogSeed) -> SemanticConfigBuilder {
        let catalog = MemoryCatalogStore::new();
        catalog.load(seed).await;
        SemanticConfigBuilder::new(Arc::new(catalog))
    }

    #[tokio::test]
    async fn builds_readable_configuration() {
        let id = Uuid::new_v4();
        let builder = builder_with(sample_seed(id, None)).await;
        let semantic = builder.build(id, None).await.unwrap();

        assert_eq!(semantic.category.name, "Ring");
        assert_eq!(semantic.base_model.name, "Halo Ring");
        assert_eq!(
            semantic.base_model.ai_description.as_deref(),
            Some("a halo engagement ring")
        );
        assert_eq!(semantic.material.description, "18k rose gold");
        assert_eq!(semantic.stones.len(), 2);
        assert_eq!(semantic.stones[0].placement_index, 0);
        assert_eq!(
            semantic.stones[0].description,
            "1.50 ct oval brilliant colorless diamond"
        );
        assert_eq!(semantic.center_stone().unwrap().name, "diamond");
        assert_eq!(semantic.engraving_text.as_deref(), Some("Forever"));
    }

    #[tokio::test]
    async fn missing_configuration_is_not_found() {
        let builder = builder_with(CatalogSeed::default()).await;
        assert!(matches!(
            builder.build(Uuid::new_v4(), None).await,
            Err(AtelierError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn other_users_configuration_is_denied() {
        let id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let builder = builder_with(sample_seed(id, Some(owner))).await;
        assert!(builder.build(id, Some(owner)).await.is_ok());
        assert!(matches!(
            builder.build(id, Some(Uuid::new_v4())).await,
            Err(AtelierError::AccessDenied(_))
        ));
        assert!(matches!(
            builder.build(id, None).await,
            Err(AtelierError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn malformed_metadata_is_dropped_not_fatal() {
        let id = Uuid::new_v4();
        let mut seed = sample_seed(id, None);
        seed.base_models[0].metadata_json = Some("{oops".into());
        let builder = builder_with(seed).await;

        let semantic = builder.build(id, None).await.unwrap();
        assert!(semantic.base_model.metadata.is_none());
        assert!(semantic.base_model.ai_description.is_none());
    }

    #[tokio::test]
    async fn stone_summary_orders_by_total_carat() {
        let id = Uuid::new_v4();
        let builder = builder_with(sample_seed(id, None)).await;
        let semantic = builder.build(id, None).await.unwrap();

        // 1.5ct diamond outweighs 6 x 0.1ct sapphires.
        assert_eq!(
            semantic.stone_summary(),
            vec![
                "a brilliant colorless diamond".to_string(),
                "6 deep royal blue sapphires".to_string(),
            ]
        );
    }

    #[test]
    fn pluralization_rules() {
        assert_eq!(pluralize("ruby"), "rubies");
        assert_eq!(pluralize("topaz"), "topazes");
        assert_eq!(pluralize("diamond"), "diamonds");
        assert_eq!(pluralize("gemstone"), "gemstones");
    }

    #[test]
    fn single_stone_group_is_singular() {
        let group = StoneGroup {
            name: "emerald".into(),
            color: None,
            quantity: 1,
            total_carat: 1.0,
            first_placement: 0,
        };
        assert_eq!(group.phrase(), "an emerald");

        let pair = StoneGroup {
            quantity: 2,
            ..group
        };
        assert_eq!(pair.phrase(), "2 emeralds");
    }
}
