use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Hard ceiling on rows returned by a single registry query.
pub const MAX_RESULT_LIMIT: usize = 50_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Directions endpoint used for multi-stop navigation links.
    pub navigation_base_url: String,
    /// Search endpoint used for single-address map links.
    pub maps_search_base_url: String,
    pub geocoder_base_url: Option<String>,
    pub road_router_base_url: Option<String>,
    pub collaborator_timeout_secs: u64,
    pub registry_result_limit: usize,
    pub query_cache_ttl_secs: u64,
    pub scoring_profile_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            navigation_base_url: http_url_or_default(
                "NAVIGATION_BASE_URL",
                "https://www.google.com/maps/dir/",
            )?,
            maps_search_base_url: http_url_or_default(
                "MAPS_SEARCH_BASE_URL",
                "https://www.google.com/maps/search/",
            )?,
            geocoder_base_url: optional_http_url("GEOCODER_BASE_URL")?,
            road_router_base_url: optional_http_url("ROAD_ROUTER_BASE_URL")?,
            collaborator_timeout_secs: std::env::var("COLLABORATOR_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("COLLABORATOR_TIMEOUT_SECS must be a number"))
                .and_then(|secs: u64| {
                    if !(1..=60).contains(&secs) {
                        anyhow::bail!("COLLABORATOR_TIMEOUT_SECS must be between 1 and 60");
                    }
                    Ok(secs)
                })?,
            registry_result_limit: std::env::var("REGISTRY_RESULT_LIMIT")
                .unwrap_or_else(|_| MAX_RESULT_LIMIT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("REGISTRY_RESULT_LIMIT must be a number"))
                .and_then(|limit: usize| {
                    if limit == 0 || limit > MAX_RESULT_LIMIT {
                        anyhow::bail!(
                            "REGISTRY_RESULT_LIMIT must be between 1 and {}",
                            MAX_RESULT_LIMIT
                        );
                    }
                    Ok(limit)
                })?,
            query_cache_ttl_secs: std::env::var("QUERY_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUERY_CACHE_TTL_SECS must be a number"))?,
            scoring_profile_path: std::env::var("SCORING_PROFILE_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Navigation base URL: {}", config.navigation_base_url);
        match (&config.geocoder_base_url, &config.road_router_base_url) {
            (Some(geo), Some(router)) => {
                tracing::info!("Geometry collaborators configured: {} / {}", geo, router)
            }
            (Some(geo), None) => {
                tracing::info!("Geocoder configured: {} (straight-line paths only)", geo)
            }
            _ => tracing::info!("No geocoder configured, route geometry disabled"),
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    pub fn query_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.query_cache_ttl_secs)
    }
}

fn optional_http_url(key: &str) -> anyhow::Result<Option<String>> {
    match std::env::var(key).ok().filter(|s| !s.trim().is_empty()) {
        None => Ok(None),
        Some(url) => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", key);
            }
            Ok(Some(url.trim().to_string()))
        }
    }
}

fn http_url_or_default(key: &str, default: &str) -> anyhow::Result<String> {
    Ok(optional_http_url(key)?.unwrap_or_else(|| default.to_string()))
}
