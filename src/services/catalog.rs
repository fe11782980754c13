// src/services/catalog.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AtelierError;
use crate::models::*;

/// Read access to the catalog rows a configuration references.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn configuration(&self, id: Uuid) -> Result<Option<Configuration>, AtelierError>;
    async fn category(&self, id: i64) -> Result<Option<Category>, AtelierError>;
    async fn base_model(&self, id: i64) -> Result<Option<BaseModel>, AtelierError>;
    async fn material(&self, id: i64) -> Result<Option<Material>, AtelierError>;
    async fn stone_type(&self, id: i64) -> Result<Option<StoneType>, AtelierError>;
}

#[derive(Default)]
struct CatalogTables {
    configurations: HashMap<Uuid, Configuration>,
    categories: HashMap<i64, Category>,
    base_models: HashMap<i64, BaseModel>,
    materials: HashMap<i64, Material>,
    stone_types: HashMap<i64, StoneType>,
}

/// In-process catalog, used for tests and local development.
#[derive(Default)]
pub struct MemoryCatalogStore {
    tables: RwLock<CatalogTables>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self, seed: CatalogSeed) {
        let mut tables = self.tables.write().await;
        for row in seed.categories {
            tables.categories.insert(row.id, row);
        }
        for row in seed.base_models {
            tables.base_models.insert(row.id, row);
        }
        for row in seed.materials {
            tables.materials.insert(row.id, row);
        }
        for row in seed.stone_types {
            tables.stone_types.insert(row.id, row);
        }
        for row in seed.configurations {
            tables.configurations.insert(row.id, row);
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn configuration(&self, id: Uuid) -> Result<Option<Configuration>, AtelierError> {
        Ok(self.tables.read().await.configurations.get(&id).cloned())
    }

    async fn category(&self, id: i64) -> Result<Option<Category>, AtelierError> {
        Ok(self.tables.read().await.categories.get(&id).cloned())
    }

    async fn base_model(&self, id: i64) -> Result<Option<BaseModel>, AtelierError> {
        Ok(self.tables.read().await.base_models.get(&id).cloned())
    }

    async fn material(&self, id: i64) -> Result<Option<Material>, AtelierError> {
        Ok(self.tables.read().await.materials.get(&id).cloned())
    }

    async fn stone_type(&self, id: i64) -> Result<Option<StoneType>, AtelierError> {
        Ok(self.tables.read().await.stone_types.get(&id).cloned())
    }
}

/// Catalog rows stored as JSON documents under `catalog:{table}:{id}`.
pub struct RedisCatalogStore {
    conn: ConnectionManager,
}

impl RedisCatalogStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(table: &str, id: impl std::fmt::Display) -> String {
        format!("catalog:{}:{}", table, id)
    }

    async fn read<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>, AtelierError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))?;

        value
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(|e| AtelierError::Serialization(format!("{}: {}", key, e)))
    }

    async fn write<T: Serialize>(&self, key: String, row: &T) -> Result<(), AtelierError> {
        let mut conn = self.conn.clone();
        let value =
            serde_json::to_string(row).map_err(|e| AtelierError::Serialization(e.to_string()))?;
        conn.set::<_, _, ()>(&key, value)
            .await
            .map_err(|e| AtelierError::Redis(e.to_string()))
    }

    /// Writes every row of a seed document, overwriting existing rows.
    pub async fn load(&self, seed: &CatalogSeed) -> Result<usize, AtelierError> {
        let mut written = 0;
        for row in &seed.categories {
            self.write(Self::key("category", row.id), row).await?;
            written += 1;
        }
        for row in &seed.base_models {
            self.write(Self::key("base_model", row.id), row).await?;
            written += 1;
        }
        for row in &seed.materials {
            self.write(Self::key("material", row.id), row).await?;
            written += 1;
        }
        for row in &seed.stone_types {
            self.write(Self::key("stone_type", row.id), row).await?;
            written += 1;
        }
        for row in &seed.configurations {
            self.write(Self::key("configuration", row.id), row).await?;
            written += 1;
        }
        info!("Seeded {} catalog rows", written);
        Ok(written)
    }
}

#[async_trait]
impl CatalogStore for RedisCatalogStore {
    async fn configuration(&self, id: Uuid) -> Result<Option<Configuration>, AtelierError> {
        self.read(Self::key("configuration", id)).await
    }

    async fn category(&self, id: i64) -> Result<Option<Category>, AtelierError> {
        self.read(Self::key("category", id)).await
    }

    async fn base_model(&self, id: i64) -> Result<Option<BaseModel>, AtelierError> {
        self.read(Self::key("base_model", id)).await
    }

    async fn material(&self, id: i64) -> Result<Option<Material>, AtelierError> {
        self.read(Self::key("material", id)).await
    }

    async fn stone_type(&self, id: i64) -> Result<Option<StoneType>, AtelierError> {
        self.read(Self::key("stone_type", id)).await
    }
}

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

struct TtlMap<K, V> {
    entries: RwLock<HashMap<K, Cached<V>>>,
}

impl<K: std::hash::Hash + Eq + Copy, V: Clone> TtlMap<K, V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, key: K, ttl: Duration) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(&key)
            .filter(|c| c.fetched_at.elapsed() < ttl)
            .map(|c| c.value.clone())
    }

    async fn put(&self, key: K, value: V) {
        self.entries.write().await.insert(
            key,
            Cached {
                value,
                fetched_at: Instant::now(),
            },
        );
    }
}

/// TTL cache over the slow-changing lookup tables. Configurations are user
/// data and always read through. Misses are not cached.
pub struct CachedCatalog {
    inner: Arc<dyn CatalogStore>,
    ttl: Duration,
    categories: TtlMap<i64, Category>,
    base_models: TtlMap<i64, BaseModel>,
    materials: TtlMap<i64, Material>,
    stone_types: TtlMap<i64, StoneType>,
}

impl CachedCatalog {
    pub fn new(inner: Arc<dyn CatalogStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            categories: TtlMap::new(),
            base_models: TtlMap::new(),
            materials: TtlMap::new(),
            stone_types: TtlMap::new(),
        }
    }
}

macro_rules! cached_lookup {
    ($self:ident, $map:ident, $method:ident, $id:expr) => {{
        if let Some(hit) = $self.$map.get($id, $self.ttl).await {
            debug!("catalog cache hit: {} {}", stringify!($map), $id);
            return Ok(Some(hit));
        }
        let value = $self.inner.$method($id).await?;
        if let Some(row) = &value {
            $self.$map.put($id, row.clone()).await;
        }
        Ok(value)
    }};
}

#[async_trait]
impl CatalogStore for CachedCatalog {
    async fn configuration(&self, id: Uuid) -> Result<Option<Configuration>, AtelierError> {
        self.inner.configuration(id).await
    }

    async fn category(&self, id: i64) -> Result<Option<Category>, AtelierError> {
        cached_lookup!(self, categories, category, id)
    }

    async fn base_model(&self, id: i64) -> Result<Option<BaseModel>, AtelierError> {
        cached_lookup!(self, base_models, base_model, id)
    }

    async fn material(&self, id: i64) -> Result<Option<Material>, AtelierError> {
        cached_lookup!(self, materials, material, id)
    }

    async fn stone_type(&self, id: i64) -> Result<Option<StoneType>, AtelierError> {
        cached_lookup!(self, stone_types, stone_type, id)
    }
}
