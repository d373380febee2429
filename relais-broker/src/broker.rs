/**
 * BROKER EMBARQUÉ - service de files point-à-point
 *
 * RÔLE :
 * Héberger des files de messages en mémoire et les exposer via un ou
 * plusieurs connecteurs TCP, le temps d'un test ou d'un process.
 *
 * FONCTIONNEMENT :
 * - add_connector() déclare les adresses avant démarrage
 * - start() rend la main tout de suite ; l'attachement des ports se fait
 *   sur une task, is_started() passe à vrai quand tout est attaché
 * - stop() arrête les connecteurs puis ferme les files ; un second stop()
 *   est refusé (AlreadyStopped)
 *
 * EXEMPLE :
 * ```ignore
 * # async fn demo() -> Result<(), relais_broker::BrokerError> {
 * let broker = relais_broker::BrokerService::new("tests");
 * broker.add_connector("tcp://localhost:61617")?;
 * broker.start()?;
 * while !broker.is_started() {
 *     tokio::time::sleep(std::time::Duration::from_millis(500)).await;
 * }
 * broker.stop().await?;
 * # Ok(())
 * # }
 * ```
 */

use crate::config::BrokerConfig;
use crate::connector::TransportConnector;
use crate::endpoint::Endpoint;
use crate::error::BrokerError;
use crate::queue::{QueueRegistry, QueueStats};
use crate::state::{new_state, BrokerState, Shared};
use std::sync::Arc;

#[derive(Clone)]
pub struct BrokerService {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    name: String,
    state: Shared<BrokerState>,
    connectors: Shared<Vec<TransportConnector>>,
    queues: QueueRegistry,
}

impl std::fmt::Debug for BrokerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerService")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl BrokerService {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                name: name.into(),
                state: new_state(BrokerState::NotStarted),
                connectors: new_state(Vec::new()),
                queues: QueueRegistry::new(),
            }),
        }
    }

    /// Broker nommé avec tous les connecteurs de la config
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let broker = Self::new(config.name.clone());
        for url in &config.connectors {
            broker.add_connector(url)?;
        }
        Ok(broker)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Déclare un connecteur ; uniquement avant `start()`
    pub fn add_connector(&self, url: &str) -> Result<TransportConnector, BrokerError> {
        let endpoint: Endpoint = url.parse()?;
        let state = self.inner.state.lock();
        if *state != BrokerState::NotStarted {
            return Err(BrokerError::InvalidState {
                name: self.inner.name.clone(),
                state: state.clone(),
                action: "add a connector",
            });
        }

        let connector = TransportConnector::new(endpoint);
        self.inner.connectors.lock().push(connector.clone());
        Ok(connector)
    }

    pub fn connectors(&self) -> Vec<TransportConnector> {
        self.inner.connectors.lock().clone()
    }

    pub fn state(&self) -> BrokerState {
        self.inner.state.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        *self.inner.state.lock() == BrokerState::Started
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.inner.queues
    }

    pub fn queue_stats(&self, destination: &str) -> QueueStats {
        self.inner.queues.stats(destination)
    }

    /// Lance le démarrage en arrière-plan (runtime tokio requis)
    pub fn start(&self) -> Result<(), BrokerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BrokerError::NoRuntime(self.inner.name.clone()))?;

        {
            let mut state = self.inner.state.lock();
            if *state != BrokerState::NotStarted {
                return Err(BrokerError::InvalidState {
                    name: self.inner.name.clone(),
                    state: state.clone(),
                    action: "start",
                });
            }
            *state = BrokerState::Starting;
        }

        let broker = self.clone();
        runtime.spawn(async move {
            let connectors = broker.connectors();
            for connector in &connectors {
                match connector.open(broker.inner.queues.clone()).await {
                    Ok(addr) => {
                        log::info!("broker '{}' listening on {}", broker.name(), Endpoint::from(addr));
                    }
                    Err(e) => {
                        log::error!("broker '{}' failed to start: {}", broker.name(), e);
                        broker.transition(&BrokerState::Starting, BrokerState::Failed(e.to_string()));
                        return;
                    }
                }
            }

            if broker.transition(&BrokerState::Starting, BrokerState::Started) {
                log::info!("broker '{}' started", broker.name());
            } else {
                // stoppé pendant le démarrage
                connectors.iter().for_each(TransportConnector::abort);
            }
        });

        Ok(())
    }

    /// Arrête les connecteurs puis ferme les files
    pub async fn stop(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock();
            if matches!(*state, BrokerState::Stopping | BrokerState::Stopped) {
                return Err(BrokerError::AlreadyStopped(self.inner.name.clone()));
            }
            *state = BrokerState::Stopping;
        }

        let mut first_error = None;
        for connector in self.connectors() {
            if let Err(e) = connector.stop().await {
                log::error!("broker '{}': connector {} did not stop cleanly: {}", self.name(), connector.endpoint(), e);
                first_error.get_or_insert(e);
            }
        }

        self.inner.queues.close();
        *self.inner.state.lock() = BrokerState::Stopped;
        log::info!("broker '{}' stopped", self.name());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Arrêt synchrone, sans attendre la fin des tasks ; retourne faux si déjà arrêté
    pub fn abort(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if *state == BrokerState::Stopped {
                return false;
            }
            *state = BrokerState::Stopped;
        }

        self.connectors().iter().for_each(TransportConnector::abort);
        self.inner.queues.close();
        log::warn!("broker '{}' aborted", self.name());
        true
    }

    fn transition(&self, from: &BrokerState, to: BrokerState) -> bool {
        let mut state = self.inner.state.lock();
        if *state == *from {
            *state = to;
            true
        } else {
            false
        }
    }
}
