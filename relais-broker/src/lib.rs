/*!
# Relais Broker - broker de messages embarqué

Broker point-à-point minimal, pensé pour les tests d'intégration :
- files FIFO en mémoire, une par destination
- connecteurs TCP (`tcp://host:port`, port 0 = éphémère)
- protocole JSON ligne à ligne (voir `wire`)
*/

pub mod broker;
pub mod config;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod queue;
pub mod state;
pub mod wire;

pub use broker::BrokerService;
pub use config::{load_config, BrokerConfig, DEFAULT_ENDPOINT};
pub use connector::TransportConnector;
pub use endpoint::{Endpoint, EndpointError};
pub use error::BrokerError;
pub use message::{Message, MessageBody};
pub use queue::{QueueRegistry, QueueStats};
pub use state::BrokerState;
