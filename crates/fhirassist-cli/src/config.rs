use fhirassist_client::{ClientConfig, IdentityTranslator, TableTranslator, Translator};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable that overrides `client.access_token`.
pub const TOKEN_ENV: &str = "FHIRASSIST_TOKEN";

/// Contents of `fhirassist.toml`.
#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// First agent message of a new conversation. `""` disables it.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Localized text keyed by the English notice.
    #[serde(default)]
    pub translations: HashMap<String, String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            data_dir: default_data_dir(),
            greeting: default_greeting(),
            translations: HashMap::new(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_greeting() -> String {
    "👋 Hello! I'm your SMART on FHIR platform assistant. I can help with users, SMART apps, \
     FHIR servers, identity providers, scopes and launch contexts.\n\n\
     What would you like to know more about?"
        .to_string()
}

impl CliConfig {
    /// Reads the config file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let config: CliConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Applies environment overrides.
    pub fn with_env_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.client.access_token = Some(token);
        }
        self
    }

    pub fn greeting(&self) -> Option<String> {
        let greeting = self.greeting.trim();
        (!greeting.is_empty()).then(|| greeting.to_string())
    }

    pub fn translator(&self) -> Arc<dyn Translator> {
        if self.translations.is_empty() {
            Arc::new(IdentityTranslator)
        } else {
            Arc::new(TableTranslator::new(self.translations.clone()))
        }
    }
}
