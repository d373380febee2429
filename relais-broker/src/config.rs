use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Adresse historique du broker de test
pub const DEFAULT_ENDPOINT: &str = "tcp://localhost:61617";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub name: String,
    pub connectors: Vec<String>,
    /// Intervalle de vérification du démarrage (ms)
    pub startup_poll_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: "relais".into(),
            connectors: vec![DEFAULT_ENDPOINT.into()],
            startup_poll_ms: 500,
        }
    }
}

pub fn parse_config(txt: &str) -> Result<BrokerConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(BrokerConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> BrokerConfig {
    let path = std::env::var("RELAIS_BROKER_CONFIG").unwrap_or_else(|_| "broker.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            log::warn!("invalid broker config {}: {}", path, e);
            BrokerConfig::default()
        })
    } else {
        log::info!("no {} found, using default broker config", path);
        BrokerConfig::default()
    }
}
