use crate::endpoint::{Endpoint, EndpointError};
use crate::state::BrokerState;

/// Erreurs possibles lors du cycle de vie du broker et de ses connecteurs
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("No tokio runtime available to start broker '{0}'")]
    NoRuntime(String),
    #[error("Broker '{name}' is {state}, cannot {action}")]
    InvalidState {
        name: String,
        state: BrokerState,
        action: &'static str,
    },
    #[error("Broker '{0}' already stopped")]
    AlreadyStopped(String),
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },
    #[error("Connector task for {0} ended abnormally")]
    ConnectorTask(Endpoint),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}
