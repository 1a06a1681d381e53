use once_cell::sync::OnceCell;
use tracing::info;

use crate::error::RelayError;

#[derive(Debug, Clone)]
pub struct Config {
    pub stream_api_key: String,
    pub stream_api_secret: String,
    pub stream_base_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub tavily_api_key: Option<String>,
    pub tavily_base_url: String,
    pub port: u16,
    pub host: String,
    pub log_level: String,
    pub log_dir: String,
    pub log_max_files: String,
    pub cors_origins: Vec<String>,
    pub agent_inactivity_minutes: u64,
    pub agent_sweep_interval_seconds: u64,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn init_global() -> Result<&'static Config, RelayError> {
        let cfg = Config::from_env()?;
        CONFIG
            .set(cfg)
            .map_err(|_| RelayError::Config("Config already initialized".to_string()))?;
        CONFIG
            .get()
            .ok_or_else(|| RelayError::Config("Config not initialized".to_string()))
    }

    fn from_env() -> Result<Config, RelayError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let read_or = |key: &str, def: &str| read(key).unwrap_or_else(|| def.to_string());
        let read_u64 = |key: &str, def: u64| -> u64 {
            match read(key) {
                Some(v) => v.parse::<u64>().unwrap_or(def),
                None => def,
            }
        };

        let stream_api_key = read("STREAM_API_KEY");
        let stream_api_secret = read("STREAM_API_SECRET");
        let (stream_api_key, stream_api_secret) = match (stream_api_key, stream_api_secret) {
            (Some(key), Some(secret)) => (key, secret),
            _ => {
                return Err(RelayError::Config(
                    "Missing env for Stream: please check STREAM_API_KEY and STREAM_API_SECRET"
                        .to_string(),
                ))
            }
        };

        let port = read("PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(3000);

        let cors_origins = match read("CORS_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => vec!["*".to_string()],
        };

        Ok(Config {
            stream_api_key,
            stream_api_secret,
            stream_base_url: read_or("STREAM_BASE_URL", "https://chat.stream-io-api.com"),
            openai_api_key: read_or("OPENAI_API_KEY", ""),
            openai_base_url: read_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: read_or("OPENAI_MODEL", "gpt-4o"),
            tavily_api_key: read("TAVILY_API_KEY"),
            tavily_base_url: read_or("TAVILY_BASE_URL", "https://api.tavily.com"),
            port,
            host: read_or("HOST", "0.0.0.0"),
            log_level: read_or("LOG_LEVEL", "info"),
            log_dir: read_or("LOG_DIR", "logs"),
            log_max_files: read_or("LOG_MAX_FILES", "7d"),
            cors_origins,
            agent_inactivity_minutes: read_u64("AGENT_INACTIVITY_MINUTES", 480),
            agent_sweep_interval_seconds: read_u64("AGENT_SWEEP_INTERVAL_SECONDS", 5),
        })
    }

    pub fn print(&self) {
        let masked = |set: bool| if set { "set" } else { "not set" };
        info!("Effective configuration:");
        info!("  - PORT: {}", self.port);
        info!("  - HOST: {}", self.host);
        info!("  - STREAM_BASE_URL: {}", self.stream_base_url);
        info!("  - STREAM_API_KEY: {}", self.stream_api_key);
        info!("  - STREAM_API_SECRET: {}", masked(!self.stream_api_secret.is_empty()));
        info!("  - OPENAI_BASE_URL: {}", self.openai_base_url);
        info!("  - OPENAI_MODEL: {}", self.openai_model);
        info!("  - OPENAI_API_KEY: {}", masked(!self.openai_api_key.is_empty()));
        info!("  - TAVILY_API_KEY: {}", masked(self.tavily_api_key.is_some()));
        info!("  - LOG_LEVEL: {}", self.log_level);
        info!("  - agents:");
        info!("    • AGENT_INACTIVITY_MINUTES: {}", self.agent_inactivity_minutes);
        info!("    • AGENT_SWEEP_INTERVAL_SECONDS: {}", self.agent_sweep_interval_seconds);
    }
}
