/**
 * ÉTATS PARTAGÉS - cycle de vie du broker et cellules partagées
 *
 * Le broker passe par NotStarted -> Starting -> Started -> Stopping -> Stopped.
 * Failed est terminal quand un connecteur n'a pas pu s'attacher à son adresse.
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// État courant d'un `BrokerService`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum BrokerState {
    NotStarted,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed(String),
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerState::NotStarted => write!(f, "not_started"),
            BrokerState::Starting => write!(f, "starting"),
            BrokerState::Started => write!(f, "started"),
            BrokerState::Stopping => write!(f, "stopping"),
            BrokerState::Stopped => write!(f, "stopped"),
            BrokerState::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}
