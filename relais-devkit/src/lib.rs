/*!
# Relais DevKit - tests d'intégration avec broker embarqué

Bibliothèque facilitant les tests contre un vrai broker avec:
- Harness qui démarre/arrête le broker autour d'un callback de test
- Client de messagerie typé (converter + marshaller)
- Politique d'erreur explicite (assertions propagées, le reste journalisé)
- Logger injectable pour vérifier ce que le harness a signalé
*/

pub mod client;
pub mod config;
pub mod converter;
pub mod harness;
pub mod logger;
pub mod marshaller;
pub mod policy;

pub use client::{ClientError, ConnectionFactory, MessagingClient, MessagingClientBuilder};
pub use config::HarnessConfig;
pub use converter::{BodyKind, ConversionError, MarshallingMessageConverter, MessageConverter};
pub use harness::{BrokerCallback, BrokerTestHarness, HarnessError, NoCallback};
pub use logger::{HarnessLogger, LogEntry, LogFacade, RecordingLogger};
pub use marshaller::{JsonMarshaller, MarshalError, Marshaller};
pub use policy::{AssertionFailed, AssertionsOnly, CallbackFailure, Disposition, ErrorPolicy, PropagateAll};
pub use relais_broker::{BrokerService, BrokerState, Message, MessageBody, TransportConnector};
