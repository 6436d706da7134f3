use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use llama_link_chat::ExchangeOptions;
use llama_link_llm::{DEFAULT_OLLAMA_ENDPOINT, ProviderConfig, RIG_OLLAMA_PROVIDER_ID};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "llama-link";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "LLAMA_LINK_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider_id", deserialize_with = "lenient_string")]
    pub provider_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub api_key: String,
    #[serde(default = "default_endpoint", deserialize_with = "lenient_string")]
    pub endpoint: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_ascii_lowercase()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = self.endpoint.trim().trim_end_matches('/').to_string();
        // Other providers fall back to their own base URL when this stays blank.
        if self.endpoint.is_empty() && self.provider_id == RIG_OLLAMA_PROVIDER_ID {
            self.endpoint = default_endpoint();
        }
        self.system_prompt = self
            .system_prompt
            .map(|prompt| prompt.trim().to_string())
            .filter(|prompt| !prompt.is_empty());
        self.temperature = self
            .temperature
            .filter(|temperature| temperature.is_finite() && *temperature >= 0.0);
        self.max_tokens = self.max_tokens.filter(|max_tokens| *max_tokens > 0);

        self
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(&self.provider_id, &self.api_key, &self.endpoint)
    }

    pub fn exchange_options(&self) -> ExchangeOptions {
        ExchangeOptions {
            preamble: self.system_prompt.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

pub struct SettingsStore {
    settings: Settings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".llama-link"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = match Self::read(&config_path) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(path = ?config_path, error = %error, "using default settings");
                Settings::default()
            }
        };
        Self {
            settings,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Defaults, then the JSON file, then `LLAMA_LINK_*` variables.
    pub fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(config_path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX))
    }

    pub fn read(config_path: &Path) -> Result<Settings, SettingsError> {
        if !config_path.exists() {
            tracing::info!(path = ?config_path, "settings file not found, using defaults");
        }

        let settings = Self::figment(config_path)
            .extract::<Settings>()
            .context(ReadConfigSnafu {
                stage: "extract-settings",
            })?;
        Ok(settings.normalized())
    }

    /// Writes `settings` as pretty JSON, replacing the file atomically.
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to read settings on `{stage}`: {source}"))]
    ReadConfig {
        stage: &'static str,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    RIG_OLLAMA_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_OLLAMA_ENDPOINT.to_string()
}

/// Text as written. Environment values like `12345` or `true` arrive typed.
#[derive(Deserialize)]
#[serde(untagged)]
enum LenientText {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl From<LenientText> for String {
    fn from(value: LenientText) -> Self {
        match value {
            LenientText::Text(text) => text,
            LenientText::Unsigned(value) => value.to_string(),
            LenientText::Signed(value) => value.to_string(),
            LenientText::Float(value) => value.to_string(),
            LenientText::Bool(value) => value.to_string(),
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    LenientText::deserialize(deserializer).map(String::from)
}

fn lenient_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<LenientText>::deserialize(deserializer).map(|value| value.map(String::from))
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn missing_file_yields_ollama_defaults() {
        Jail::expect_with(|jail| {
            let settings = SettingsStore::read(&jail.directory().join(SETTINGS_FILE_NAME))
                .expect("defaults should extract");

            assert_eq!(settings, Settings::default());
            assert_eq!(settings.endpoint, DEFAULT_OLLAMA_ENDPOINT);
            assert_eq!(settings.exchange_options(), ExchangeOptions::default());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_the_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                SETTINGS_FILE_NAME,
                r#"{
                    "provider_id": "openai",
                    "api_key": "  sk-file  ",
                    "endpoint": "https://api.example.com/v1/",
                    "system_prompt": "Be terse."
                }"#,
            )?;
            jail.set_env("LLAMA_LINK_MAX_TOKENS", "512");
            jail.set_env("LLAMA_LINK_TEMPERATURE", "0.5");

            let settings = SettingsStore::read(&jail.directory().join(SETTINGS_FILE_NAME))
                .expect("settings should extract");

            assert_eq!(settings.provider_id, "openai");
            assert_eq!(settings.api_key, "sk-file");
            assert_eq!(settings.endpoint, "https://api.example.com/v1");
            assert_eq!(settings.max_tokens, Some(512));
            assert_eq!(settings.temperature, Some(0.5));
            assert_eq!(
                settings.exchange_options().preamble.as_deref(),
                Some("Be terse.")
            );
            Ok(())
        });
    }

    #[test]
    fn typed_environment_values_still_read_as_text() {
        Jail::expect_with(|jail| {
            jail.create_file(
                SETTINGS_FILE_NAME,
                r#"{ "provider_id": "openai", "endpoint": "https://api.example.com/v1" }"#,
            )?;
            jail.set_env("LLAMA_LINK_API_KEY", "12345");
            jail.set_env("LLAMA_LINK_SYSTEM_PROMPT", "true");

            let settings = SettingsStore::read(&jail.directory().join(SETTINGS_FILE_NAME))
                .expect("numeric key should extract");

            assert_eq!(settings.provider_id, "openai");
            assert_eq!(settings.endpoint, "https://api.example.com/v1");
            assert_eq!(settings.api_key, "12345");
            assert_eq!(settings.system_prompt.as_deref(), Some("true"));
            Ok(())
        });
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(SETTINGS_FILE_NAME, r#"{ "max_tokens": "lots" }"#)?;
            let path = jail.directory().join(SETTINGS_FILE_NAME);

            assert!(matches!(
                SettingsStore::read(&path),
                Err(SettingsError::ReadConfig { .. })
            ));
            assert_eq!(SettingsStore::new(path).settings(), &Settings::default());
            Ok(())
        });
    }

    #[test]
    fn normalization_restores_blank_fields() {
        let settings = Settings {
            provider_id: "  ".to_string(),
            api_key: " ".to_string(),
            endpoint: String::new(),
            system_prompt: Some("   ".to_string()),
            temperature: Some(f64::NAN),
            max_tokens: Some(0),
        }
        .normalized();

        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn blank_openai_endpoint_stays_blank() {
        let settings = Settings {
            provider_id: "OpenAI".to_string(),
            endpoint: " ".to_string(),
            ..Settings::default()
        }
        .normalized();

        assert_eq!(settings.provider_id, "openai");
        assert_eq!(settings.to_provider_config().endpoint, "");
    }

    #[test]
    fn save_writes_a_readable_file() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join(SETTINGS_FILE_NAME);
            let store = SettingsStore::new(path.clone());
            let settings = Settings {
                system_prompt: Some("Answer in French.".to_string()),
                max_tokens: Some(1024),
                ..Settings::default()
            };

            store.save(&settings).expect("save should succeed");

            assert!(path.exists());
            assert!(!path.with_extension("json.tmp").exists());
            let reread = SettingsStore::read(&path).expect("saved file should extract");
            assert_eq!(reread, settings);
            Ok(())
        });
    }
}
