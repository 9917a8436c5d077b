use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_addr: String,
    pub bucket: String,
    pub log_level: Option<String>,
    /// Environment-level switch for mutation-token extraction. The server
    /// must also advertise MUTATION_SEQNO before tokens appear.
    #[serde(default = "default_mutation_tokens")]
    pub mutation_tokens: bool,
    pub keepalive_interval_secs: Option<u64>,
}

fn default_mutation_tokens() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // The standard data port locally
            server_addr: "127.0.0.1:11210".to_string(),
            bucket: "default".to_string(),
            log_level: None,
            mutation_tokens: true,
            keepalive_interval_secs: Some(30),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. If `path_opt` is None or the file is
    /// missing/unreadable, returns defaults. Parsing errors are returned.
    pub fn load_from_file(path_opt: Option<&str>) -> Result<Self> {
        let path = path_opt.unwrap_or("memwire.toml");
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(cfg) => Ok(cfg),
                Err(e) => Err(Error::Msg(format!("Failed to parse {}: {}", path, e))),
            },
            Err(_e) => Ok(Self::default()),
        }
    }

    /// Apply CLI/env overrides (highest precedence) to an existing config.
    pub fn with_overrides(
        mut self,
        server_addr: Option<String>,
        bucket: Option<String>,
        log_level: Option<String>,
        mutation_tokens: Option<bool>,
    ) -> Self {
        if let Some(addr) = server_addr {
            self.server_addr = addr;
        }
        if let Some(b) = bucket {
            self.bucket = b;
        }
        if let Some(ll) = log_level {
            self.log_level = Some(ll);
        }
        if let Some(mt) = mutation_tokens {
            self.mutation_tokens = mt;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_addr.is_empty() {
            return Err(Error::Msg("server_addr cannot be empty".to_string()));
        }
        if !self.server_addr.contains(':') {
            return Err(Error::Msg(format!(
                "server_addr '{}' must be in host:port format",
                self.server_addr
            )));
        }
        if self.bucket.is_empty() {
            return Err(Error::Msg("bucket cannot be empty".to_string()));
        }
        if let Some(0) = self.keepalive_interval_secs {
            return Err(Error::Msg(
                "keepalive_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server_addr, "127.0.0.1:11210");
        assert_eq!(cfg.bucket, "default");
        assert!(cfg.mutation_tokens);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let cfg = Config::default().with_overrides(
            Some("10.0.0.1:11210".into()),
            Some("travel".into()),
            None,
            Some(false),
        );
        assert_eq!(cfg.server_addr, "10.0.0.1:11210");
        assert_eq!(cfg.bucket, "travel");
        assert!(!cfg.mutation_tokens);
    }

    #[test]
    fn test_validate_rejects_bad_addr() {
        let cfg = Config::default().with_overrides(Some("nocolon".into()), None, None, None);
        assert!(cfg.validate().is_err());
    }
}
