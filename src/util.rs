use std::net::SocketAddr;

use crate::config::{HubConfig, IngestConfig};

const SENTINEL_HUB_URL: &str = "SENTINEL_HUB_URL";

pub fn get_hub_url() -> Option<String> {
    std::env::var(SENTINEL_HUB_URL).ok()
}

const SENTINEL_BIND: &str = "SENTINEL_BIND";

pub fn get_bind() -> Option<SocketAddr> {
    std::env::var(SENTINEL_BIND).ok().and_then(|res| res.parse().ok())
}

const SENTINEL_ALLOWED_ORIGINS: &str = "SENTINEL_ALLOWED_ORIGINS";

/// Comma separated list of origins
pub fn get_allowed_origins() -> Option<Vec<String>> {
    let origins_from_env = std::env::var(SENTINEL_ALLOWED_ORIGINS).ok()?;
    Some(
        origins_from_env
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect(),
    )
}

const SENTINEL_GROUP_ID: &str = "SENTINEL_GROUP_ID";

pub fn get_group_id() -> Option<String> {
    std::env::var(SENTINEL_GROUP_ID).ok()
}

pub fn apply_hub_env(config: &mut HubConfig) {
    if let Some(bind) = get_bind() {
        config.bind = bind;
    }
    if let Some(origins) = get_allowed_origins() {
        config.allowed_origins = origins;
    }
}

pub fn apply_ingest_env(config: &mut IngestConfig) {
    if let Some(bind) = get_bind() {
        config.bind = bind;
    }
    if let Some(origins) = get_allowed_origins() {
        config.allowed_origins = origins;
    }
    if let Some(url) = get_hub_url() {
        config.hub_url = url;
    }
    if let Some(group_id) = get_group_id() {
        config.group_id = group_id;
    }
}
