// src/models/catalog.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AtelierError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseModel {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_price: f64,
    /// Free-form JSON authored in the admin catalog. Parsed on demand.
    #[serde(default)]
    pub metadata_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub id: i64,
    pub name: String,
    /// Metal family as stored in the catalog, e.g. "gold", "platinum", "silver".
    pub metal_type: String,
    /// Purity marking, e.g. "18K", "950", "925".
    #[serde(default)]
    pub purity: Option<String>,
    #[serde(default)]
    pub color_hex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoneType {
    pub id: i64,
    pub name: String,
    /// Short catalog code, e.g. "DIA", "SAP".
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationStone {
    pub stone_type_id: i64,
    #[serde(default)]
    pub color_hex: Option<String>,
    #[serde(default)]
    pub carat: f64,
    #[serde(default)]
    pub shape: Option<String>,
    /// Setting position; 0 is the center stone.
    pub placement_index: u32,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// A user's in-progress customization of a base model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub id: Uuid,
    /// `None` for configurations built by guests.
    #[serde(default)]
    pub owner_user_id: Option<Uuid>,
    pub base_model_id: i64,
    pub material_id: i64,
    #[serde(default)]
    pub engraving_text: Option<String>,
    #[serde(default)]
    pub stones: Vec<ConfigurationStone>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Configuration {
    pub fn ensure_accessible_by(&self, requester: Option<Uuid>) -> Result<(), AtelierError> {
        match self.owner_user_id {
            Some(owner) if requester != Some(owner) => Err(AtelierError::AccessDenied(format!(
                "configuration {} belongs to another user",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

/// Optional AI-oriented metadata attached to a base model. Unknown keys are
/// preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseModelMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BaseModelMetadata {
    /// `None` for blank input; an error for anything that is not a JSON object.
    pub fn parse(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(trimmed).map(Some)
    }
}

/// Seed document used to load catalog rows into a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub base_models: Vec<BaseModel>,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub stone_types: Vec<StoneType>,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}
