use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub const SYSTEM_PROMPT: &str = "You are an AI assistant designed for public sector organizations. Your goal is to provide accurate, unbiased, and helpful information on topics related to governance, public policy, civic engagement, and administrative procedures. Please be formal, professional, and cite sources when possible. Avoid expressing personal opinions or political biases.";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(SYSTEM_PROMPT)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("civic-chat").join("config.json"))
    }
}

/// The one required credential. Checked before the terminal enters raw mode
/// so a missing key is an ordinary fatal startup error.
pub fn api_key_from_env() -> Result<String> {
    std::env::var("GEMINI_API_KEY")
        .map_err(|_| anyhow!("GEMINI_API_KEY environment variable not set"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.system_prompt(), SYSTEM_PROMPT);
    }

    #[test]
    fn round_trips_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("civic-chat").join("config.json");

        let config = Config {
            model: Some("gemini-2.0-flash".to_string()),
            system_prompt: None,
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.model(), "gemini-2.0-flash");
        assert_eq!(loaded.system_prompt(), SYSTEM_PROMPT);
    }

    #[test]
    fn rejects_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
