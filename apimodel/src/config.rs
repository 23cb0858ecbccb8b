//! Client configuration.

use apimodel_transport::HttpConfig;
use serde::{Deserialize, Serialize};

/// Configuration for an [`EntityClient`](crate::EntityClient).
///
/// Missing fields take their defaults, so a config file only needs what it
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connection settings for the HTTP transport.
    #[serde(flatten)]
    pub http: HttpConfig,
    /// Cache lifetime for entity types that do not set their own (seconds, `<= 0` disables).
    pub default_cache_max_age_secs: i64,
    /// Relation batch size for relations that do not set their own.
    pub default_batch_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            default_cache_max_age_secs: 60,
            default_batch_size: 20,
        }
    }
}

impl ClientConfig {
    /// Shorthand for a default config against `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
