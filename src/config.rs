use std::env;

use tokio::time::Duration;

use crate::errors::ConfigError;

pub const ENV_WORKERS: &str = "BOUNDED_RUNNER_WORKERS";
pub const ENV_GRACE_MS: &str = "BOUNDED_RUNNER_GRACE_MS";

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workers: usize,
    /// Default grace period for `shutdown_default`.
    pub grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            grace_period: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            workers: num_cpus::get(),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        Self {
            workers: num_cpus::get() * 2,
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Defaults overlaid with `BOUNDED_RUNNER_WORKERS` / `BOUNDED_RUNNER_GRACE_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_WORKERS) {
            config.workers = parse_env(ENV_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_GRACE_MS) {
            config.grace_period = Duration::from_millis(parse_env(ENV_GRACE_MS, &raw)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.workers.to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn presets_have_workers() {
        assert!(Config::default().workers >= 1);
        assert_eq!(Config::io_bound().workers, Config::cpu_bound().workers * 2);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[(ENV_WORKERS, "3"), (ENV_GRACE_MS, "250")]))
            .unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.grace_period, Duration::from_millis(250));
    }

    #[test]
    fn env_rejects_garbage_and_zero() {
        assert_eq!(
            Config::from_lookup(lookup(&[(ENV_WORKERS, "many")])),
            Err(ConfigError::InvalidEnv {
                key: ENV_WORKERS,
                value: "many".into()
            })
        );
        assert!(matches!(
            Config::from_lookup(lookup(&[(ENV_WORKERS, "0")])),
            Err(ConfigError::InvalidWorkerCount(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[(ENV_GRACE_MS, "-5")])),
            Err(ConfigError::InvalidEnv { .. })
        ));
    }

    #[test]
    fn zero_grace_is_allowed() {
        let config = Config::default().with_grace_period(Duration::ZERO);
        assert!(config.validate().is_ok());
    }
}
