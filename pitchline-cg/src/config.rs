//! Configuration resolution for pitchline-cg
//!
//! Provides multi-tier configuration resolution with Database → ENV → TOML
//! priority for the evaluator base URL.

use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use pitchline_common::config::TomlConfig;
use pitchline_common::{Error, Result};

/// Environment variable carrying the evaluator base URL
pub const EVALUATOR_URL_ENV: &str = "PITCHLINE_EVALUATOR_URL";

/// Resolve the evaluator base URL from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_evaluator_base_url(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<String> {
    let mut sources = Vec::new();

    // Tier 1: Database (authoritative)
    let db_url = crate::db::settings::get_evaluator_base_url(db).await?;
    if let Some(url) = &db_url {
        if is_valid_url(url) {
            sources.push("database");
        }
    }

    // Tier 2: Environment variable
    let env_url = std::env::var(EVALUATOR_URL_ENV).ok();
    if let Some(url) = &env_url {
        if is_valid_url(url) {
            sources.push("environment");
        }
    }

    // Tier 3: TOML config
    let toml_url = toml_config.evaluator_base_url.as_ref();
    if let Some(url) = toml_url {
        if is_valid_url(url) {
            sources.push("TOML");
        }
    }

    // Warn if multiple sources (potential misconfiguration)
    if sources.len() > 1 {
        warn!(
            "Evaluator base URL found in multiple sources: {}. Using database (highest priority).",
            sources.join(", ")
        );
    }

    // Resolution priority
    if let Some(url) = db_url {
        if is_valid_url(&url) {
            info!("Evaluator base URL loaded from database");
            return Ok(url);
        }
    }

    if let Some(url) = env_url {
        if is_valid_url(&url) {
            info!("Evaluator base URL loaded from environment variable");
            return Ok(url);
        }
    }

    if let Some(url) = toml_url {
        if is_valid_url(url) {
            info!("Evaluator base URL loaded from TOML config");
            return Ok(url.clone());
        }
    }

    Err(Error::Config(format!(
        "Evaluator base URL not configured. Please configure using one of:\n\
         1. Settings table: key 'cg_evaluator_base_url'\n\
         2. Environment: {}=http://host:port\n\
         3. TOML config: ~/.config/pitchline/config.toml (evaluator_base_url = \"http://host:port\")",
        EVALUATOR_URL_ENV
    )))
}

/// Validate a base URL (non-empty, http scheme)
pub fn is_valid_url(url: &str) -> bool {
    let trimmed = url.trim();
    !trimmed.is_empty() && (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(is_valid_url("http://localhost:9300"));
        assert!(is_valid_url("https://evaluator.internal"));
        assert!(!is_valid_url(""));
        assert!(!is_valid_url("   "));
        assert!(!is_valid_url("localhost:9300"));
    }
}
