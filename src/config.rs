use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_allow_async")]
    pub allow_async: bool,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default)]
    pub window_size: usize,
}

fn default_topic() -> String {
    "visualization".to_string()
}
fn default_workers() -> usize {
    2
}
fn default_allow_async() -> bool {
    true
}
fn default_sample_size() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let config = Self {
            topic: std::env::var("SAMPLER_TOPIC")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_topic),
            workers: env_parse("SAMPLER_WORKERS").unwrap_or_else(default_workers),
            allow_async: env_parse("SAMPLER_ASYNC").unwrap_or_else(default_allow_async),
            sample_size: env_parse("SAMPLE_SIZE").unwrap_or_else(default_sample_size),
            // 0 表示使用 floor(sqrt(sample_size))
            window_size: env_parse("WINDOW_SIZE").unwrap_or(0),
        };

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            workers: default_workers(),
            allow_async: default_allow_async(),
            sample_size: default_sample_size(),
            window_size: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.topic, "visualization");
        assert_eq!(config.workers, 2);
        assert!(config.allow_async);
        assert_eq!(config.window_size, 0);
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("SAMPLER_TOPIC", "minimap");
        std::env::set_var("SAMPLER_WORKERS", "3");
        std::env::set_var("SAMPLER_ASYNC", "false");
        std::env::set_var("WINDOW_SIZE", "not-a-number");

        let config = Config::from_env().unwrap();
        assert_eq!(config.topic, "minimap");
        assert_eq!(config.workers, 3);
        assert!(!config.allow_async);
        assert_eq!(config.window_size, 0);

        std::env::remove_var("SAMPLER_TOPIC");
        std::env::remove_var("SAMPLER_WORKERS");
        std::env::remove_var("SAMPLER_ASYNC");
        std::env::remove_var("WINDOW_SIZE");
    }
}
