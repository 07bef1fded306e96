use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

// Directory configuration sourced from environment variables, with an
// optional YAML override file for deployments that prefer config files.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Whether slug resolution may consult the slug cache at all.
    pub slug_cache_read: bool,
    pub slug_cache_ttl: Duration,
    /// Whether project reads may consult the project cache at all.
    pub project_cache_read: bool,
    pub project_cache_ttl: Duration,
    /// How long a renamed-away slug keeps resolving before reclamation.
    pub slug_expire_after_migration: Duration,
    pub token_size: usize,
    pub token_expiry: Duration,
    /// Apex domain under which project subdomains are served.
    pub base_domain: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            slug_cache_read: true,
            slug_cache_ttl: Duration::from_secs(60 * 60),
            project_cache_read: true,
            project_cache_ttl: Duration::from_secs(60),
            slug_expire_after_migration: Duration::from_secs(24 * 60 * 60),
            token_size: 6,
            token_expiry: Duration::from_secs(15 * 60),
            base_domain: "echoboard.io".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryConfigOverride {
    slug_cache_read: Option<bool>,
    slug_cache_ttl_secs: Option<u64>,
    project_cache_read: Option<bool>,
    project_cache_ttl_secs: Option<u64>,
    slug_expire_after_migration_secs: Option<u64>,
    token_size: Option<usize>,
    token_expiry_secs: Option<u64>,
    base_domain: Option<String>,
}

impl DirectoryConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("ECHOBOARD_SLUG_CACHE_READ") {
            config.slug_cache_read = value
                .parse()
                .with_context(|| "parse ECHOBOARD_SLUG_CACHE_READ")?;
        }
        if let Some(secs) = env_secs("ECHOBOARD_SLUG_CACHE_TTL_SECS")? {
            config.slug_cache_ttl = secs;
        }
        if let Ok(value) = std::env::var("ECHOBOARD_PROJECT_CACHE_READ") {
            config.project_cache_read = value
                .parse()
                .with_context(|| "parse ECHOBOARD_PROJECT_CACHE_READ")?;
        }
        if let Some(secs) = env_secs("ECHOBOARD_PROJECT_CACHE_TTL_SECS")? {
            config.project_cache_ttl = secs;
        }
        if let Some(secs) = env_secs("ECHOBOARD_SLUG_MIGRATION_GRACE_SECS")? {
            config.slug_expire_after_migration = secs;
        }
        if let Ok(value) = std::env::var("ECHOBOARD_TOKEN_SIZE") {
            config.token_size = value.parse().with_context(|| "parse ECHOBOARD_TOKEN_SIZE")?;
        }
        if let Some(secs) = env_secs("ECHOBOARD_TOKEN_EXPIRY_SECS")? {
            config.token_expiry = secs;
        }
        if let Ok(value) = std::env::var("ECHOBOARD_BASE_DOMAIN") {
            config.base_domain = value;
        }
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("ECHOBOARD_DIRECTORY_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read ECHOBOARD_DIRECTORY_CONFIG: {path}"))?;
            let override_cfg: DirectoryConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse directory config yaml")?;
            if let Some(value) = override_cfg.slug_cache_read {
                config.slug_cache_read = value;
            }
            if let Some(value) = override_cfg.slug_cache_ttl_secs {
                config.slug_cache_ttl = Duration::from_secs(value);
            }
            if let Some(value) = override_cfg.project_cache_read {
                config.project_cache_read = value;
            }
            if let Some(value) = override_cfg.project_cache_ttl_secs {
                config.project_cache_ttl = Duration::from_secs(value);
            }
            if let Some(value) = override_cfg.slug_expire_after_migration_secs {
                config.slug_expire_after_migration = Duration::from_secs(value);
            }
            if let Some(value) = override_cfg.token_size {
                config.token_size = value;
            }
            if let Some(value) = override_cfg.token_expiry_secs {
                config.token_expiry = Duration::from_secs(value);
            }
            if let Some(value) = override_cfg.base_domain {
                config.base_domain = value;
            }
        }
        Ok(config)
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(value) => {
            let secs: u64 = value.parse().with_context(|| format!("parse {name}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}
