use std::time::Duration;

use cfl_expr::RunId;
use uuid::Uuid;

use crate::error::HostError;

pub const ENV_TICKET_TIMEOUT_SECS: &str = "CFL_TICKET_TIMEOUT_SECS";
pub const ENV_RUN_ID: &str = "CFL_RUN_ID";
pub const ENV_LOG: &str = "CFL_LOG";

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Upper bound on one backend execution; exceeding it fails the ticket.
    pub ticket_timeout: Duration,
    /// Fixed run identity. A fresh one is generated when absent, so tickets
    /// are only shared within one process lifetime.
    pub run_id: Option<RunId>,
    /// `tracing_subscriber::EnvFilter` directives.
    pub log_filter: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ticket_timeout: Duration::from_secs(3600),
            run_id: None,
            log_filter: "info".into(),
        }
    }
}

impl HostConfig {
    /// Build HostConfig from `CFL_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, HostError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HostError> {
        let mut config = Self::default();
        if let Some(secs) = lookup(ENV_TICKET_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|err| {
                HostError::Config(format!("{ENV_TICKET_TIMEOUT_SECS}='{secs}': {err}"))
            })?;
            config.ticket_timeout = Duration::from_secs(secs);
        }
        if let Some(run) = lookup(ENV_RUN_ID) {
            let uuid = Uuid::parse_str(run.trim())
                .map_err(|err| HostError::Config(format!("{ENV_RUN_ID}='{run}': {err}")))?;
            config.run_id = Some(RunId::from_uuid(uuid));
        }
        if let Some(filter) = lookup(ENV_LOG) {
            config.log_filter = filter;
        }
        Ok(config)
    }

    /// Configured run identity, or a fresh one.
    pub fn resolve_run_id(&self) -> RunId {
        self.run_id.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let config = HostConfig::from_lookup(lookup(&[
            (ENV_TICKET_TIMEOUT_SECS, "5"),
            (ENV_RUN_ID, "67e55044-10b1-426f-9247-bb680e5fe0c8"),
            (ENV_LOG, "cfl_host=debug"),
        ]))
        .unwrap();
        assert_eq!(config.ticket_timeout, Duration::from_secs(5));
        assert_eq!(
            config.run_id.map(|run| run.as_uuid().to_string()),
            Some("67e55044-10b1-426f-9247-bb680e5fe0c8".to_string())
        );
        assert_eq!(config.log_filter, "cfl_host=debug");
    }

    #[test]
    fn missing_vars_keep_defaults() {
        let config = HostConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.ticket_timeout, HostConfig::default().ticket_timeout);
        assert!(config.run_id.is_none());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = HostConfig::from_lookup(lookup(&[(ENV_TICKET_TIMEOUT_SECS, "soon")])).unwrap_err();
        assert!(matches!(err, HostError::Config(msg) if msg.contains(ENV_TICKET_TIMEOUT_SECS)));
        assert!(HostConfig::from_lookup(lookup(&[(ENV_RUN_ID, "nope")])).is_err());
    }
}
