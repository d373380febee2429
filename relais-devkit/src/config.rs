//! Configuration du harness (adresse, attente de démarrage, client)

use crate::client::DEFAULT_RECEIVE_TIMEOUT;
use relais_broker::DEFAULT_ENDPOINT;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub broker_name: String,
    /// Adresse du connecteur ; une seule exécution à la fois par adresse
    pub endpoint: String,
    /// Premier intervalle de vérification du démarrage, doublé à chaque tour
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    /// `None` = attente illimitée
    pub startup_timeout: Option<Duration>,
    pub default_destination: Option<String>,
    pub receive_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            broker_name: "relais-test".into(),
            endpoint: DEFAULT_ENDPOINT.into(),
            poll_interval: Duration::from_millis(500),
            max_poll_interval: Duration::from_secs(2),
            startup_timeout: Some(Duration::from_secs(30)),
            default_destination: None,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }
}

impl HarnessConfig {
    /// Défauts surchargés par RELAIS_HARNESS_ENDPOINT, RELAIS_HARNESS_POLL_MS,
    /// RELAIS_HARNESS_STARTUP_TIMEOUT_MS (0 = illimité) et RELAIS_HARNESS_DESTINATION
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("RELAIS_HARNESS_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(ms) = parse_millis(&lookup, "RELAIS_HARNESS_POLL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_millis(&lookup, "RELAIS_HARNESS_STARTUP_TIMEOUT_MS") {
            config.startup_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(destination) = lookup("RELAIS_HARNESS_DESTINATION") {
            config.default_destination = Some(destination);
        }

        config
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_default_destination<S: Into<String>>(mut self, destination: S) -> Self {
        self.default_destination = Some(destination.into());
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a number of milliseconds", key, raw);
            None
        }
    }
}
