//! Resolution of user-tunable settings.
//!
//! Each value comes from the first source that has it: command-line flag,
//! environment variable, config database, built-in default.

use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::{config_db::ConfigDb, error::Result, generation, model_manager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SettingKey {
    #[value(name = "llm_model", alias = "llm-model")]
    LlmModel,
    #[value(name = "llm_base_url", alias = "llm-base-url")]
    LlmBaseUrl,
    #[value(name = "embedding_model", alias = "embedding-model")]
    EmbeddingModel,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::LlmModel,
        SettingKey::LlmBaseUrl,
        SettingKey::EmbeddingModel,
    ];

    /// Key in the config database.
    pub fn key(self) -> &'static str {
        match self {
            SettingKey::LlmModel => "llm_model",
            SettingKey::LlmBaseUrl => "llm_base_url",
            SettingKey::EmbeddingModel => "embedding_model",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            SettingKey::LlmModel => "DIVINE_LLM_MODEL",
            SettingKey::LlmBaseUrl => "DIVINE_LLM_BASE_URL",
            SettingKey::EmbeddingModel => model_manager::MODEL_ENV_VAR,
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            SettingKey::LlmModel => generation::DEFAULT_MODEL,
            SettingKey::LlmBaseUrl => generation::DEFAULT_BASE_URL,
            SettingKey::EmbeddingModel => model_manager::DEFAULT_MODEL_ID,
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SettingKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        SettingKey::ALL
            .into_iter()
            .find(|k| k.key().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("unknown setting: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Flag,
    Env,
    Config,
    Default,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Flag => "flag",
            Source::Env => "env",
            Source::Config => "config",
            Source::Default => "default",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub value: String,
    pub source: Source,
}

/// Values given on the command line, if any.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub embedding_model: Option<String>,
}

impl Overrides {
    fn get(&self, key: SettingKey) -> Option<&str> {
        match key {
            SettingKey::LlmModel => self.llm_model.as_deref(),
            SettingKey::LlmBaseUrl => self.llm_base_url.as_deref(),
            SettingKey::EmbeddingModel => self.embedding_model.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub llm_model: Resolved,
    pub llm_base_url: Resolved,
    pub embedding_model: Resolved,
}

impl Settings {
    pub fn resolve(overrides: &Overrides, db: Option<&ConfigDb>) -> Result<Self> {
        Self::resolve_with(overrides, db, |name| std::env::var(name).ok())
    }

    /// [`Settings::resolve`] with an explicit environment lookup.
    pub fn resolve_with(
        overrides: &Overrides,
        db: Option<&ConfigDb>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let resolve = |key: SettingKey| -> Result<Resolved> {
            let non_empty = |v: &str| !v.trim().is_empty();

            if let Some(v) = overrides.get(key).filter(|v| non_empty(v)) {
                return Ok(Resolved {
                    value: v.to_string(),
                    source: Source::Flag,
                });
            }
            if let Some(v) = env(key.env_var()).filter(|v| non_empty(v)) {
                return Ok(Resolved {
                    value: v,
                    source: Source::Env,
                });
            }
            if let Some(db) = db
                && let Some(v) = db.get_setting(key.key())?
            {
                return Ok(Resolved {
                    value: v,
                    source: Source::Config,
                });
            }
            Ok(Resolved {
                value: key.default_value().to_string(),
                source: Source::Default,
            })
        };

        Ok(Self {
            llm_model: resolve(SettingKey::LlmModel)?,
            llm_base_url: resolve(SettingKey::LlmBaseUrl)?,
            embedding_model: resolve(SettingKey::EmbeddingModel)?,
        })
    }

    pub fn get(&self, key: SettingKey) -> &Resolved {
        match key {
            SettingKey::LlmModel => &self.llm_model,
            SettingKey::LlmBaseUrl => &self.llm_base_url,
            SettingKey::EmbeddingModel => &self.embedding_model,
        }
    }

    /// Backend configuration for these settings, key taken from the
    /// environment.
    pub fn backend_config(&self) -> generation::BackendConfig {
        generation::BackendConfig {
            base_url: self.llm_base_url.value.clone(),
            model: self.llm_model.value.clone(),
            ..generation::BackendConfig::from_env()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_when_nothing_set() {
        let settings = Settings::resolve_with(&Overrides::default(), None, no_env).unwrap();
        assert_eq!(settings.llm_model.value, generation::DEFAULT_MODEL);
        assert_eq!(settings.llm_model.source, Source::Default);
        assert_eq!(
            settings.embedding_model.value,
            model_manager::DEFAULT_MODEL_ID
        );
    }

    #[test]
    fn precedence_is_flag_env_config_default() {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        db.set_setting("llm_model", "from-config").unwrap();
        db.set_setting("llm_base_url", "http://config/v1").unwrap();
        db.set_setting("embedding_model", "config/embedder").unwrap();

        let env = |name: &str| match name {
            "DIVINE_LLM_BASE_URL" | "DIVINE_EMBEDDING_MODEL" => {
                Some(format!("env:{name}"))
            }
            _ => None,
        };
        let overrides = Overrides {
            embedding_model: Some("flag/embedder".into()),
            ..Overrides::default()
        };

        let settings = Settings::resolve_with(&overrides, Some(&db), env).unwrap();
        assert_eq!(settings.llm_model.source, Source::Config);
        assert_eq!(settings.llm_model.value, "from-config");
        assert_eq!(settings.llm_base_url.source, Source::Env);
        assert_eq!(settings.embedding_model.source, Source::Flag);
        assert_eq!(settings.embedding_model.value, "flag/embedder");
    }

    #[test]
    fn blank_values_are_skipped() {
        let overrides = Overrides {
            llm_model: Some("  ".into()),
            ..Overrides::default()
        };
        let env = |_: &str| Some(String::new());
        let settings = Settings::resolve_with(&overrides, None, env).unwrap();
        assert_eq!(settings.llm_model.source, Source::Default);
    }

    #[test]
    fn keys_parse_with_dashes() {
        assert_eq!("llm-model".parse::<SettingKey>().unwrap(), SettingKey::LlmModel);
        assert_eq!(
            "EMBEDDING_MODEL".parse::<SettingKey>().unwrap(),
            SettingKey::EmbeddingModel
        );
        assert!("api_key".parse::<SettingKey>().is_err());
    }
}
