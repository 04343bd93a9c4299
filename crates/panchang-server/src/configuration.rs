use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use panchang_chat::agent::DEFAULT_MAX_STEPS;
use panchang_chat::panchang::{
    Observer, PanchangConfig, DEFAULT_BASE_URL, DEFAULT_LATITUDE, DEFAULT_LONGITUDE,
    DEFAULT_STRATEGY, DEFAULT_TIMEZONE,
};
use panchang_chat::providers::configs::{OpenAiProviderConfig, ProviderConfig};
use panchang_chat::providers::openai::{OPENAI_HOST, OPENAI_MODEL};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on the wall clock time of one reply
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Upper bound on model completions per reply
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_duration_secs: default_max_duration_secs(),
            max_steps: default_max_steps(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
        }
    }
}

/// Where the Panchang tools point and which observer they ask about
#[derive(Debug, Deserialize)]
pub struct CalendarSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            latitude: default_latitude(),
            longitude: default_longitude(),
            timezone: default_timezone(),
            strategy: default_strategy(),
        }
    }
}

impl CalendarSettings {
    pub fn into_config(self) -> PanchangConfig {
        PanchangConfig::new(
            self.base_url,
            Observer {
                latitude: self.latitude,
                longitude: self.longitude,
                timezone: self.timezone,
                strategy: self.strategy,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub calendar: CalendarSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("server.max_duration_secs", default_max_duration_secs())?
            .set_default("server.max_steps", default_max_steps() as u64)?
            // Provider defaults
            .set_default("provider.type", "openai")?
            .set_default("provider.host", default_openai_host())?
            .set_default("provider.model", default_model())?;

        // The conventional OpenAI variable stands in for an unset PANCHANG_PROVIDER__API_KEY
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            builder = builder.set_default("provider.api_key", api_key)?;
        }

        let config = builder
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("PANCHANG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Handle both NotFound and missing field message variants
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // "missing field `api_key`", possibly followed by the key it was read for
                    let field = error_str.split('`').nth(1).unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_duration_secs() -> u64 {
    30
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_model() -> String {
    OPENAI_MODEL.to_string()
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_latitude() -> f64 {
    DEFAULT_LATITUDE
}

fn default_longitude() -> f64 {
    DEFAULT_LONGITUDE
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}
