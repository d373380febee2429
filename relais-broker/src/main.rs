/**
 * RELAIS BROKER - broker autonome
 *
 * RÔLE : lancer le broker embarqué hors des tests (debug manuel, CI multi-process).
 * Config : .env puis RELAIS_BROKER_CONFIG (défaut broker.yaml), sinon défauts.
 */

use anyhow::{bail, Result};
use relais_broker::{load_config, BrokerService, BrokerState};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = load_config().await;
    let broker = BrokerService::from_config(&cfg)?;
    broker.start()?;

    while !broker.is_started() {
        if let BrokerState::Failed(reason) = broker.state() {
            bail!("broker '{}' failed to start: {}", broker.name(), reason);
        }
        tokio::time::sleep(Duration::from_millis(cfg.startup_poll_ms)).await;
    }

    for connector in broker.connectors() {
        if let Some(endpoint) = connector.connect_endpoint() {
            log::info!("accepting clients on {}", endpoint);
        }
    }

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown requested");
    for destination in broker.queues().destinations() {
        let stats = broker.queue_stats(&destination);
        log::info!(
            "queue '{}': {} pending, {} enqueued, {} dequeued",
            destination, stats.depth, stats.enqueued, stats.dequeued
        );
    }
    broker.stop().await?;
    Ok(())
}
