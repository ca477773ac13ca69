//! Orchestrator configuration
//!
//! Process-wide settings loaded from environment variables. Per-run
//! parameters (model, dataset, destination) live on the run record instead,
//! so a resumed run always uses what it was started with.

use std::time::Duration;

use ferry_core::domain::stage::Stage;

pub const DEFAULT_VALIDATION_PROMPT: &str =
    "Reply with a short greeting to confirm this endpoint is serving.";

/// Ceiling on the total time one stage attempt may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTimeouts {
    pub train: Duration,
    pub promote: Duration,
    pub deploy: Duration,
    pub validate: Duration,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Train => self.train,
            Stage::Promote => self.promote,
            Stage::Deploy => self.deploy,
            Stage::Validate => self.validate,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            train: Duration::from_secs(24 * 60 * 60),
            promote: Duration::from_secs(10 * 60),
            deploy: Duration::from_secs(60 * 60),
            validate: Duration::from_secs(2 * 60),
        }
    }
}

/// Policy knobs of the pipeline orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// How often asynchronous stages query their external operation
    pub poll_interval: Duration,
    pub timeouts: StageTimeouts,
    /// Automatic retries of a retriable stage failure, not counting the first attempt
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub validation_prompt: String,
    /// Release the endpoint when Validate fails permanently
    pub teardown_on_validation_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            timeouts: StageTimeouts::default(),
            max_retries: 3,
            backoff_initial: Duration::from_millis(5_000),
            backoff_max: Duration::from_millis(300_000),
            validation_prompt: DEFAULT_VALIDATION_PROMPT.to_string(),
            teardown_on_validation_failure: false,
        }
    }
}

/// Base URLs and credentials of the external collaborators
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub training_url: String,
    pub registry_url: String,
    pub deployment_url: String,
    pub inference_url: String,
    pub access_token: Option<String>,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        let local = "http://localhost:9000".to_string();
        Self {
            training_url: local.clone(),
            registry_url: local.clone(),
            deployment_url: local.clone(),
            inference_url: local,
            access_token: None,
        }
    }
}

/// Orchestrator process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL; runs are kept in memory when unset
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub services: ServiceEndpoints,
    pub orchestrator: OrchestratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            services: ServiceEndpoints::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Recognized variables:
    /// - DATABASE_URL (optional, in-memory store when unset)
    /// - FERRY_BIND_ADDR (default: 0.0.0.0:8080)
    /// - FERRY_TRAINING_URL, FERRY_REGISTRY_URL, FERRY_DEPLOYMENT_URL,
    ///   FERRY_INFERENCE_URL (default: http://localhost:9000)
    /// - FERRY_ACCESS_TOKEN (optional)
    /// - FERRY_POLL_INTERVAL_SECS (default: 60)
    /// - FERRY_TRAIN_TIMEOUT_SECS, FERRY_PROMOTE_TIMEOUT_SECS,
    ///   FERRY_DEPLOY_TIMEOUT_SECS, FERRY_VALIDATE_TIMEOUT_SECS
    ///   (default: 86400, 600, 3600, 120)
    /// - FERRY_MAX_RETRIES (default: 3)
    /// - FERRY_BACKOFF_INITIAL_MS, FERRY_BACKOFF_MAX_MS (default: 5000, 300000)
    /// - FERRY_VALIDATION_PROMPT (optional)
    /// - FERRY_TEARDOWN_ON_VALIDATION_FAILURE (default: false)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Config::default();
        let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(parse_var::<u64>(&var, key)?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };
        let millis = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(parse_var::<u64>(&var, key)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let services = ServiceEndpoints {
            training_url: var("FERRY_TRAINING_URL").unwrap_or(defaults.services.training_url),
            registry_url: var("FERRY_REGISTRY_URL").unwrap_or(defaults.services.registry_url),
            deployment_url: var("FERRY_DEPLOYMENT_URL")
                .unwrap_or(defaults.services.deployment_url),
            inference_url: var("FERRY_INFERENCE_URL").unwrap_or(defaults.services.inference_url),
            access_token: var("FERRY_ACCESS_TOKEN").filter(|t| !t.is_empty()),
        };

        let base = defaults.orchestrator;
        let orchestrator = OrchestratorConfig {
            poll_interval: secs("FERRY_POLL_INTERVAL_SECS", base.poll_interval)?,
            timeouts: StageTimeouts {
                train: secs("FERRY_TRAIN_TIMEOUT_SECS", base.timeouts.train)?,
                promote: secs("FERRY_PROMOTE_TIMEOUT_SECS", base.timeouts.promote)?,
                deploy: secs("FERRY_DEPLOY_TIMEOUT_SECS", base.timeouts.deploy)?,
                validate: secs("FERRY_VALIDATE_TIMEOUT_SECS", base.timeouts.validate)?,
            },
            max_retries: parse_var(&var, "FERRY_MAX_RETRIES")?.unwrap_or(base.max_retries),
            backoff_initial: millis("FERRY_BACKOFF_INITIAL_MS", base.backoff_initial)?,
            backoff_max: millis("FERRY_BACKOFF_MAX_MS", base.backoff_max)?,
            validation_prompt: var("FERRY_VALIDATION_PROMPT").unwrap_or(base.validation_prompt),
            teardown_on_validation_failure: parse_var(&var, "FERRY_TEARDOWN_ON_VALIDATION_FAILURE")?
                .unwrap_or(base.teardown_on_validation_failure),
        };

        Ok(Self {
            database_url: var("DATABASE_URL").filter(|u| !u.is_empty()),
            bind_addr: var("FERRY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            services,
            orchestrator,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        for (name, url) in [
            ("training_url", &self.services.training_url),
            ("registry_url", &self.services.registry_url),
            ("deployment_url", &self.services.deployment_url),
            ("inference_url", &self.services.inference_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        let o = &self.orchestrator;
        if o.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        for stage in Stage::ALL {
            if o.timeouts.for_stage(stage).is_zero() {
                anyhow::bail!("{} timeout must be greater than 0", stage);
            }
        }

        if o.backoff_initial > o.backoff_max {
            anyhow::bail!("backoff_initial cannot exceed backoff_max");
        }

        if o.validation_prompt.trim().is_empty() {
            anyhow::bail!("validation_prompt cannot be empty");
        }

        Ok(())
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", raw, key, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.orchestrator.poll_interval, Duration::from_secs(60));
        assert_eq!(config.orchestrator.timeouts.train, Duration::from_secs(86_400));
        assert_eq!(config.orchestrator.timeouts.deploy, Duration::from_secs(3_600));
        assert_eq!(config.orchestrator.max_retries, 3);
        assert!(!config.orchestrator.teardown_on_validation_failure);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://ferry@localhost/ferry"),
            ("FERRY_POLL_INTERVAL_SECS", "5"),
            ("FERRY_DEPLOY_TIMEOUT_SECS", "900"),
            ("FERRY_MAX_RETRIES", "0"),
            ("FERRY_BACKOFF_INITIAL_MS", "100"),
            ("FERRY_TEARDOWN_ON_VALIDATION_FAILURE", "true"),
            ("FERRY_ACCESS_TOKEN", "secret"),
        ])
        .unwrap();

        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://ferry@localhost/ferry")
        );
        assert_eq!(config.orchestrator.poll_interval, Duration::from_secs(5));
        assert_eq!(
            config.orchestrator.timeouts.for_stage(Stage::Deploy),
            Duration::from_secs(900)
        );
        assert_eq!(config.orchestrator.max_retries, 0);
        assert_eq!(config.orchestrator.backoff_initial, Duration::from_millis(100));
        assert!(config.orchestrator.teardown_on_validation_failure);
        assert_eq!(config.services.access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let err = load(&[("FERRY_MAX_RETRIES", "three")]).unwrap_err();
        assert!(err.to_string().contains("FERRY_MAX_RETRIES"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.services.registry_url = "registry.internal".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.orchestrator.timeouts.validate = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.orchestrator.backoff_initial = Duration::from_secs(600);
        assert!(config.validate().is_err());
    }
}
