// src/config.rs
//! Service configuration loaded from environment variables.
//!
//! Every setting has a default so the service starts with zero configuration
//! for local development (dryrun providers, local media directory).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::services::PromptFormat;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Env: `HTTP_ADDR`. Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Env: `REDIS_URL`. Default: `redis://127.0.0.1:6379`
    pub redis_url: String,

    /// Env: `APP_ENV` (`production` enables the guest limit and hides
    /// failure details).
    pub production: bool,

    /// Directory for the local object store. Env: `STORAGE_ROOT`
    pub storage_root: PathBuf,

    /// Prefix for public object URLs. Env: `PUBLIC_BASE_URL`
    pub public_base_url: String,

    /// `openai` | `stability` | `dryrun`. Env: `IMAGE_PROVIDER`
    /// Default: `openai` when an OpenAI key is present, otherwise `dryrun`.
    pub image_provider: String,

    /// `openai` | `anthropic` | `dryrun`. Env: `VISION_PROVIDER`
    pub vision_provider: String,

    pub openai_api_key: Option<String>,
    pub openai_image_model: String,
    pub openai_vision_model: String,
    pub stability_api_key: Option<String>,
    pub stability_api_base: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,

    /// Per-request HTTP timeout for provider calls. Env: `PROVIDER_TIMEOUT_SECS`
    pub provider_timeout: Duration,

    /// Upper bound for one job's generation work. Env: `JOB_TIMEOUT_SECS`
    pub job_timeout: Duration,

    /// Env: `GUEST_PREVIEW_LIMIT`. Default: 5 in production, 0 (unlimited)
    /// otherwise.
    pub guest_preview_limit: u32,

    pub default_frame_count: u32,
    pub max_frame_count: u32,
    pub max_upload_bytes: usize,
    pub worker_poll_interval: Duration,
    pub prompt_format: PromptFormat,

    /// Env: `EXPOSE_ERROR_DETAILS`. Default: on outside production.
    pub expose_error_details: bool,

    pub catalog_cache_ttl: Duration,

    /// JSON catalog seed loaded at startup. Env: `CATALOG_SEED_PATH`
    pub catalog_seed_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            production: false,
            storage_root: PathBuf::from("./media"),
            public_base_url: "http://localhost:8080/media".to_string(),
            image_provider: "dryrun".to_string(),
            vision_provider: "dryrun".to_string(),
            openai_api_key: None,
            openai_image_model: "dall-e-3".to_string(),
            openai_vision_model: "gpt-4o".to_string(),
            stability_api_key: None,
            stability_api_base: None,
            anthropic_api_key: None,
            anthropic_model: "claude-3-5-sonnet-20241022".to_string(),
            provider_timeout: Duration::from_secs(120),
            job_timeout: Duration::from_secs(300),
            guest_preview_limit: 0,
            default_frame_count: 12,
            max_frame_count: 36,
            max_upload_bytes: 10 * 1024 * 1024, // 10 MiB
            worker_poll_interval: Duration::from_millis(2000),
            prompt_format: PromptFormat::Natural,
            expose_error_details: true,
            catalog_cache_ttl: Duration::from_secs(300),
            catalog_seed_path: None,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid {}='{}', using default", key, value);
                default
            }
        },
        None => default,
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            warn!("Invalid {}='{}', using default", key, v);
            default
        }
        None => default,
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values behave as unset.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.http_addr = parse_or("HTTP_ADDR", get("HTTP_ADDR"), config.http_addr);
        if let Some(url) = get("REDIS_URL") {
            config.redis_url = url;
        }
        config.production = get("APP_ENV")
            .map(|env| matches!(env.trim().to_ascii_lowercase().as_str(), "production" | "prod"))
            .unwrap_or(false);

        if let Some(root) = get("STORAGE_ROOT") {
            config.storage_root = PathBuf::from(root);
        }
        if let Some(base) = get("PUBLIC_BASE_URL") {
            config.public_base_url = base.trim_end_matches('/').to_string();
        }

        config.openai_api_key = get("OPENAI_API_KEY");
        config.stability_api_key = get("STABILITY_API_KEY");
        config.stability_api_base = get("STABILITY_API_BASE");
        config.anthropic_api_key = get("ANTHROPIC_API_KEY");
        if let Some(model) = get("OPENAI_IMAGE_MODEL") {
            config.openai_image_model = model;
        }
        if let Some(model) = get("OPENAI_VISION_MODEL") {
            config.openai_vision_model = model;
        }
        if let Some(model) = get("ANTHROPIC_MODEL") {
            config.anthropic_model = model;
        }

        let keyed_default = if config.openai_api_key.is_some() {
            "openai"
        } else {
            "dryrun"
        };
        config.image_provider = get("IMAGE_PROVIDER")
            .map(|p| p.trim().to_ascii_lowercase())
            .unwrap_or_else(|| keyed_default.to_string());
        config.vision_provider = get("VISION_PROVIDER")
            .map(|p| p.trim().to_ascii_lowercase())
            .unwrap_or_else(|| keyed_default.to_string());

        config.provider_timeout = Duration::from_secs(parse_or(
            "PROVIDER_TIMEOUT_SECS",
            get("PROVIDER_TIMEOUT_SECS"),
            config.provider_timeout.as_secs(),
        ));
        config.job_timeout = Duration::from_secs(parse_or(
            "JOB_TIMEOUT_SECS",
            get("JOB_TIMEOUT_SECS"),
            config.job_timeout.as_secs(),
        ));

        let guest_default = if config.production { 5 } else { 0 };
        config.guest_preview_limit =
            parse_or("GUEST_PREVIEW_LIMIT", get("GUEST_PREVIEW_LIMIT"), guest_default);

        config.max_frame_count = parse_or(
            "MAX_FRAME_COUNT",
            get("MAX_FRAME_COUNT"),
            config.max_frame_count,
        )
        .max(1);
        config.default_frame_count = parse_or(
            "DEFAULT_FRAME_COUNT",
            get("DEFAULT_FRAME_COUNT"),
            config.default_frame_count,
        );
        if config.default_frame_count == 0 || config.default_frame_count > config.max_frame_count {
            warn!(
                "DEFAULT_FRAME_COUNT={} is outside 1..={}, clamping",
                config.default_frame_count, config.max_frame_count
            );
            config.default_frame_count =
                config.default_frame_count.clamp(1, config.max_frame_count);
        }

        config.max_upload_bytes =
            parse_or("MAX_UPLOAD_BYTES", get("MAX_UPLOAD_BYTES"), config.max_upload_bytes);
        config.worker_poll_interval = Duration::from_millis(parse_or(
            "WORKER_POLL_INTERVAL_MS",
            get("WORKER_POLL_INTERVAL_MS"),
            config.worker_poll_interval.as_millis() as u64,
        ));

        if let Some(format) = get("PROMPT_FORMAT") {
            match format.parse::<PromptFormat>() {
                Ok(parsed) => config.prompt_format = parsed,
                Err(e) => warn!("{}, using default", e),
            }
        }

        config.expose_error_details = parse_flag(
            "EXPOSE_ERROR_DETAILS",
            get("EXPOSE_ERROR_DETAILS"),
            !config.production,
        );
        config.catalog_cache_ttl = Duration::from_secs(parse_or(
            "CATALOG_CACHE_TTL_SECS",
            get("CATALOG_CACHE_TTL_SECS"),
            config.catalog_cache_ttl.as_secs(),
        ));
        config.catalog_seed_path = get("CATALOG_SEED_PATH").map(PathBuf::from);

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_run_offline() {
        let config = config_from(&[]);
        assert_eq!(config.http_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.image_provider, "dryrun");
        assert_eq!(config.vision_provider, "dryrun");
        assert_eq!(config.guest_preview_limit, 0);
        assert_eq!(config.default_frame_count, 12);
        assert_eq!(config.max_frame_count, 36);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.expose_error_details);
    }

    #[test]
    fn production_tightens_guest_limit_and_error_details() {
        let config = config_from(&[("APP_ENV", "Production")]);
        assert!(config.production);
        assert_eq!(config.guest_preview_limit, 5);
        assert!(!config.expose_error_details);

        let overridden = config_from(&[
            ("APP_ENV", "production"),
            ("GUEST_PREVIEW_LIMIT", "0"),
            ("EXPOSE_ERROR_DETAILS", "true"),
        ]);
        assert_eq!(overridden.guest_preview_limit, 0);
        assert!(overridden.expose_error_details);
    }

    #[test]
    fn openai_key_selects_openai_providers() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("VISION_PROVIDER", "Anthropic"),
        ]);
        assert_eq!(config.image_provider, "openai");
        assert_eq!(config.vision_provider, "anthropic");
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("JOB_TIMEOUT_SECS", "soon"),
            ("PROMPT_FORMAT", "yaml"),
            ("EXPOSE_ERROR_DETAILS", "maybe"),
        ]);
        assert_eq!(config.http_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.prompt_format, PromptFormat::Natural);
        assert!(config.expose_error_details);
    }

    #[test]
    fn default_frame_count_is_clamped_to_max() {
        let config = config_from(&[("MAX_FRAME_COUNT", "8"), ("DEFAULT_FRAME_COUNT", "24")]);
        assert_eq!(config.default_frame_count, 8);
    }
}
