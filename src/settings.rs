use std::path::Path;
use tracing::info;

use crate::config::ConfigPatch;
use crate::error::ConfigError;

/// Reads a JSON override file. Unlike runtime failures, a malformed file or a
/// budget with out-of-order thresholds is a startup error.
pub fn load_overrides(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let patch: ConfigPatch = serde_json::from_str(&content)?;
    if let Some(budget) = &patch.budget {
        budget.validate()?;
    }
    info!("Loaded config overrides from {:?}", path);
    Ok(patch)
}
