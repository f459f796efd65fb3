pub mod model;
pub mod validate;

use std::path::Path;

use model::ConvoyConfig;

/// Load and parse a config file, returning the parsed config together with
/// the raw source text (validation diagnostics point into it).
pub fn load_config(path: &Path) -> anyhow::Result<(ConvoyConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: ConvoyConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((config, content))
}
