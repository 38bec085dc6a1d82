use anyhow::{Context, Result, anyhow};
use shortid::ResolverConfig;
use std::env;
use std::fs;

/// Process configuration read from `SHORTID_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: Option<String>,
    pub collection: String,
    pub id_field: String,
    pub token: Option<String>,
    pub bind: String,
    pub resolver: ResolverConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut resolver = match env::var("SHORTID_CONFIG") {
            Ok(path) => {
                let json = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file '{}'", path))?;
                ResolverConfig::from_json_str(&json).map_err(|err| anyhow!(err))?
            }
            Err(_) => ResolverConfig::default(),
        };

        if let Some(page_size) = parse_var::<u32>("SHORTID_PAGE_SIZE")? {
            resolver.build.page_size = page_size;
        }
        if let Some(max_pages) = parse_var::<u32>("SHORTID_MAX_PAGES")? {
            resolver.build.max_pages = max_pages;
        }
        if let Some(ttl_ms) = parse_var::<u64>("SHORTID_TTL_MS")? {
            resolver.ttl_ms = ttl_ms;
        }
        if let Some(modulus) = parse_var::<u64>("SHORTID_MODULUS")? {
            resolver.modulus = modulus;
        }
        resolver.validate().map_err(|err| anyhow!(err))?;

        Ok(Self {
            base_url: env::var("SHORTID_BASE_URL").ok(),
            collection: env::var("SHORTID_COLLECTION").unwrap_or_else(|_| "users".to_string()),
            id_field: env::var("SHORTID_ID_FIELD").unwrap_or_else(|_| "id".to_string()),
            token: env::var("SHORTID_TOKEN").ok(),
            bind: env::var("SHORTID_BIND").unwrap_or_else(|_| "127.0.0.1:8089".to_string()),
            resolver,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a valid number, got '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}
