use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Sentinel for a generation knob that must not be sent to the classifier.
pub const UNSET: f32 = -1.0;
pub const UNSET_INT: i32 = -1;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub classifier: ClassifierConfig,
    pub actions: ActionsConfig,
    pub sessions: SessionsConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    /// Full chat-completions URL, posted to verbatim.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub pool_max_idle_per_host: usize,
    pub temperature: f32,
    pub max_tokens: i32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    pub repetition_penalty: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ActionsConfig {
    /// Allow-list, matched exactly and case-sensitively.
    pub allowed: Vec<String>,
    pub directory: String,
    #[serde(default)]
    pub executable_extension: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionsConfig {
    pub cache_capacity: usize,
    /// Hard cap on sessions kept in memory. `None` keeps every session for
    /// the lifetime of the process.
    #[serde(default)]
    pub max_sessions: Option<usize>,
    pub serialize_turns: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    /// `{{ACTIONS}}` is replaced by the comma separated allow-list.
    pub system_instruction: String,
}

impl ClassifierConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: String::new(),
            model: model.into(),
            timeout_seconds: 30,
            pool_max_idle_per_host: 100,
            temperature: UNSET,
            max_tokens: UNSET_INT,
            top_k: UNSET_INT,
            top_p: UNSET,
            min_p: UNSET,
            repetition_penalty: UNSET,
        }
    }
}

impl PromptsConfig {
    pub const DEFAULT_SYSTEM_INSTRUCTION: &'static str =
        "Available actions: {{ACTIONS}}. Classify the following prompt by returning a JSON object with the field 'action'.";

    pub fn render_system_instruction(&self, actions: &[String]) -> String {
        self.system_instruction
            .replace("{{ACTIONS}}", &actions.join(", "))
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_instruction: Self::DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080_i64)?
            .set_default("classifier.endpoint", "http://127.0.0.1:1234/v1/chat/completions")?
            .set_default("classifier.api_key", "")?
            .set_default("classifier.model", "gemma-3-1b-it")?
            .set_default("classifier.timeout_seconds", 30_i64)?
            .set_default("classifier.pool_max_idle_per_host", 100_i64)?
            .set_default("classifier.temperature", UNSET as f64)?
            .set_default("classifier.max_tokens", UNSET_INT as i64)?
            .set_default("classifier.top_k", UNSET_INT as i64)?
            .set_default("classifier.top_p", UNSET as f64)?
            .set_default("classifier.min_p", UNSET as f64)?
            .set_default("classifier.repetition_penalty", UNSET as f64)?
            .set_default("actions.allowed", Vec::<String>::new())?
            .set_default("actions.directory", "actions")?
            .set_default("actions.executable_extension", std::env::consts::EXE_SUFFIX)?
            .set_default("actions.timeout_seconds", 30_i64)?
            .set_default("sessions.cache_capacity", 1000_i64)?
            .set_default("sessions.serialize_turns", false)?
            .set_default(
                "prompts.system_instruction",
                PromptsConfig::DEFAULT_SYSTEM_INSTRUCTION,
            )?
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("actions.allowed")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.classifier.endpoint.trim().is_empty() {
            bail!("classifier.endpoint must not be empty");
        }
        if self.actions.allowed.iter().all(|a| a.trim().is_empty()) {
            bail!("actions.allowed must name at least one action");
        }
        if self.sessions.cache_capacity == 0 {
            bail!("sessions.cache_capacity must be greater than zero");
        }
        if let Some(max) = self.sessions.max_sessions {
            if max < self.sessions.cache_capacity {
                bail!(
                    "sessions.max_sessions ({}) is smaller than sessions.cache_capacity ({})",
                    max,
                    self.sessions.cache_capacity
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Settings {
        Settings {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            classifier: ClassifierConfig::new("http://localhost/v1/chat/completions", "m"),
            actions: ActionsConfig {
                allowed: vec!["llamada".into(), "mensaje".into()],
                directory: "actions".into(),
                executable_extension: String::new(),
                timeout_seconds: 5,
            },
            sessions: SessionsConfig {
                cache_capacity: 10,
                max_sessions: None,
                serialize_turns: false,
            },
            prompts: PromptsConfig::default(),
        }
    }

    #[test]
    fn test_render_system_instruction() {
        let prompts = PromptsConfig::default();
        let text = prompts.render_system_instruction(&["llamada".into(), "correo".into()]);
        assert!(text.starts_with("Available actions: llamada, correo."));
        assert!(!text.contains("{{ACTIONS}}"));
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());

        let mut empty_actions = sample();
        empty_actions.actions.allowed.clear();
        assert!(empty_actions.validate().is_err());

        let mut zero_cache = sample();
        zero_cache.sessions.cache_capacity = 0;
        assert!(zero_cache.validate().is_err());

        let mut tiny_cap = sample();
        tiny_cap.sessions.max_sessions = Some(2);
        assert!(tiny_cap.validate().is_err());
    }

    #[test]
    fn test_classifier_knobs_default_to_unset() {
        let cfg = ClassifierConfig::new("http://x", "m");
        assert_eq!(cfg.temperature, UNSET);
        assert_eq!(cfg.max_tokens, UNSET_INT);
        assert_eq!(cfg.timeout_seconds, 30);
    }
}
