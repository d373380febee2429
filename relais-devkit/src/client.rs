/*!
Client de messagerie typé

`ConnectionFactory` ouvre une connexion TCP vers un connecteur du broker ;
`MessagingClient<T>` ouvre une connexion par opération, convertit les payloads
via son `MessageConverter<T>` et parle le protocole de `relais_broker::wire`.

La configuration se finalise avec `MessagingClientBuilder::build()` : factory
et converter sont obligatoires.
*/

use crate::converter::{ConversionError, MessageConverter};
use relais_broker::wire::{read_frame, write_frame, Request, Response, WireError};
use relais_broker::{Endpoint, Message, QueueStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use uuid::Uuid;

/// Attente par défaut d'un `receive`
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Messaging client not configured: missing {0}")]
    NotConfigured(&'static str),
    #[error("No default destination configured")]
    NoDefaultDestination,
    #[error("Cannot connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Broker rejected request: {0}")]
    Rejected(String),
    #[error("Unexpected response from broker: {0}")]
    UnexpectedResponse(String),
}

/// Fabrique de connexions vers un connecteur du broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFactory {
    endpoint: Endpoint,
}

impl ConnectionFactory {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn connect(&self) -> Result<Connection, ClientError> {
        let stream = TcpStream::connect(self.endpoint.target())
            .await
            .map_err(|source| ClientError::Connect { endpoint: self.endpoint.clone(), source })?;
        let (read_half, writer) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read_half),
            writer,
        })
    }
}

/// Connexion ouverte : une requête, une réponse
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    pub async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        write_frame(&mut self.writer, request).await?;
        match read_frame(&mut self.reader).await? {
            Some(Response::Error { reason }) => Err(ClientError::Rejected(reason)),
            Some(response) => Ok(response),
            None => Err(WireError::ConnectionClosed.into()),
        }
    }
}

pub struct MessagingClient<T> {
    factory: ConnectionFactory,
    converter: Arc<dyn MessageConverter<T>>,
    default_destination: Option<String>,
    receive_timeout: Duration,
}

impl<T> Clone for MessagingClient<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            converter: Arc::clone(&self.converter),
            default_destination: self.default_destination.clone(),
            receive_timeout: self.receive_timeout,
        }
    }
}

impl<T> std::fmt::Debug for MessagingClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingClient")
            .field("endpoint", self.factory.endpoint())
            .field("default_destination", &self.default_destination)
            .field("receive_timeout", &self.receive_timeout)
            .finish_non_exhaustive()
    }
}

impl<T> MessagingClient<T> {
    pub fn builder() -> MessagingClientBuilder<T> {
        MessagingClientBuilder::default()
    }

    pub fn connection_factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    pub fn default_destination(&self) -> Option<&str> {
        self.default_destination.as_deref()
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Convertit et envoie vers la destination par défaut
    pub async fn convert_and_send(&self, payload: &T) -> Result<Uuid, ClientError> {
        let destination = self.require_default_destination()?.to_string();
        self.convert_and_send_to(&destination, payload).await
    }

    pub async fn convert_and_send_to(&self, destination: &str, payload: &T) -> Result<Uuid, ClientError> {
        let message = self.converter.to_message(destination, payload)?;
        self.send(message).await
    }

    /// Envoie un message déjà construit, sans conversion
    pub async fn send(&self, message: Message) -> Result<Uuid, ClientError> {
        let mut connection = self.factory.connect().await?;
        match connection.request(&Request::Send { message }).await? {
            Response::Sent { id } => Ok(id),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Attend au plus `receive_timeout` ; `Duration::ZERO` = sans attente
    pub async fn receive(&self, destination: &str) -> Result<Option<Message>, ClientError> {
        let mut connection = self.factory.connect().await?;
        let request = Request::Receive {
            destination: destination.to_string(),
            timeout_ms: u64::try_from(self.receive_timeout.as_millis()).unwrap_or(u64::MAX),
        };
        match connection.request(&request).await? {
            Response::Message { message } => Ok(message),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    pub async fn receive_and_convert(&self) -> Result<Option<T>, ClientError> {
        let destination = self.require_default_destination()?.to_string();
        self.receive_and_convert_from(&destination).await
    }

    pub async fn receive_and_convert_from(&self, destination: &str) -> Result<Option<T>, ClientError> {
        match self.receive(destination).await? {
            Some(message) => Ok(Some(self.converter.from_message(&message)?)),
            None => Ok(None),
        }
    }

    pub async fn queue_stats(&self, destination: &str) -> Result<QueueStats, ClientError> {
        let mut connection = self.factory.connect().await?;
        match connection.request(&Request::Stats { destination: destination.to_string() }).await? {
            Response::Stats { stats } => Ok(stats),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        let mut connection = self.factory.connect().await?;
        match connection.request(&Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    fn require_default_destination(&self) -> Result<&str, ClientError> {
        self.default_destination
            .as_deref()
            .ok_or(ClientError::NoDefaultDestination)
    }
}

pub struct MessagingClientBuilder<T> {
    factory: Option<ConnectionFactory>,
    converter: Option<Arc<dyn MessageConverter<T>>>,
    default_destination: Option<String>,
    receive_timeout: Duration,
}

impl<T> Default for MessagingClientBuilder<T> {
    fn default() -> Self {
        Self {
            factory: None,
            converter: None,
            default_destination: None,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }
}

impl<T> MessagingClientBuilder<T> {
    pub fn connection_factory(mut self, factory: ConnectionFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn message_converter<C>(mut self, converter: C) -> Self
    where
        C: MessageConverter<T> + 'static,
    {
        self.converter = Some(Arc::new(converter));
        self
    }

    pub fn default_destination<S: Into<String>>(mut self, destination: S) -> Self {
        self.default_destination = Some(destination.into());
        self
    }

    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Finalise la configuration : factory et converter obligatoires
    pub fn build(self) -> Result<MessagingClient<T>, ClientError> {
        let factory = self.factory.ok_or(ClientError::NotConfigured("connection factory"))?;
        let converter = self.converter.ok_or(ClientError::NotConfigured("message converter"))?;
        Ok(MessagingClient {
            factory,
            converter,
            default_destination: self.default_destination,
            receive_timeout: self.receive_timeout,
        })
    }
}
