pub mod model;


use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

// Re-export main types
pub use self::model::{Config, LoggingConfig};

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks every section. The tool section is only checked by `run`, so a
    /// merge-only config may leave the program unset.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.merge.validate()?;
        self.job.validate()?;

        if !matches!(self.logging.verbosity.as_str(), "silent" | "normal" | "verbose") {
            anyhow::bail!("verbosity must be 'silent', 'normal', or 'verbose'");
        }

        Ok(())
    }
}
