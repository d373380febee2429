/**
 * CONNECTEUR DE TRANSPORT - écoute TCP d'un broker
 *
 * RÔLE : accepter les connexions clientes sur une adresse et servir chaque
 * session (une requête -> une réponse) contre le registre de files.
 *
 * FONCTIONNEMENT :
 * - open() s'attache à l'adresse (port 0 = éphémère) et lance la boucle d'accept
 * - stop() signale l'arrêt et attend la fin de la boucle : au retour, le port est libéré
 * - abort() est la variante synchrone, sans attente
 */

use crate::endpoint::Endpoint;
use crate::error::BrokerError;
use crate::queue::QueueRegistry;
use crate::state::{new_state, Shared};
use crate::wire::{read_frame, write_frame, Request, Response, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

#[derive(Clone)]
pub struct TransportConnector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    endpoint: Endpoint,
    local_addr: Shared<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    task: Shared<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TransportConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnector")
            .field("endpoint", &self.inner.endpoint)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl TransportConnector {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectorInner {
                endpoint,
                local_addr: new_state(None),
                shutdown,
                task: new_state(None),
            }),
        }
    }

    /// Adresse configurée (telle que passée à `add_connector`)
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Adresse réellement attachée, une fois ouvert
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Adresse à donner aux clients (port éphémère résolu)
    pub fn connect_endpoint(&self) -> Option<Endpoint> {
        self.local_addr().map(Endpoint::from)
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub(crate) async fn open(&self, queues: QueueRegistry) -> Result<SocketAddr, BrokerError> {
        let endpoint = &self.inner.endpoint;
        let listener = TcpListener::bind(endpoint.target())
            .await
            .map_err(|source| BrokerError::Bind { endpoint: endpoint.clone(), source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| BrokerError::Bind { endpoint: endpoint.clone(), source })?;

        *self.inner.local_addr.lock() = Some(addr);
        let shutdown = self.inner.shutdown.subscribe();
        let task = tokio::spawn(accept_loop(listener, queues, shutdown, addr));
        *self.inner.task.lock() = Some(task);

        log::debug!("connector {} bound to {}", endpoint, addr);
        Ok(addr)
    }

    /// Arrête l'écoute et ferme les sessions ouvertes (idempotent)
    pub async fn stop(&self) -> Result<(), BrokerError> {
        let task = self.inner.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        self.inner.shutdown.send_replace(true);
        match task.await {
            Ok(()) => {
                log::debug!("connector {} stopped", self.inner.endpoint);
                Ok(())
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(_) => Err(BrokerError::ConnectorTask(self.inner.endpoint.clone())),
        }
    }

    /// Arrêt synchrone : la boucle est annulée, le port se libère dès qu'elle est détruite
    pub fn abort(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            self.inner.shutdown.send_replace(true);
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    queues: QueueRegistry,
    mut shutdown: watch::Receiver<bool>,
    addr: SocketAddr,
) {
    let mut sessions = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    log::debug!("session opened from {} on {}", peer, addr);
                    sessions.spawn(serve_session(stream, peer, queues.clone()));
                }
                Err(e) => {
                    log::warn!("accept failed on {}: {}", addr, e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    sessions.shutdown().await;
    drop(listener);
    log::debug!("listener on {} closed", addr);
}

async fn serve_session(stream: TcpStream, peer: SocketAddr, queues: QueueRegistry) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let response = match read_frame::<_, Request>(&mut reader).await {
            Ok(Some(request)) => handle_request(&queues, request).await,
            Ok(None) => break,
            Err(WireError::Json(e)) => Response::Error { reason: format!("invalid request: {e}") },
            Err(e) => {
                log::warn!("session {} dropped: {}", peer, e);
                break;
            }
        };

        if let Err(e) = write_frame(&mut write_half, &response).await {
            log::warn!("failed to answer {}: {}", peer, e);
            break;
        }
    }

    log::debug!("session closed for {}", peer);
}

pub(crate) async fn handle_request(queues: &QueueRegistry, request: Request) -> Response {
    match request {
        Request::Send { message } => {
            let id = message.id;
            log::debug!("enqueue {} on '{}' ({} bytes)", id, message.destination, message.body.len());
            match queues.enqueue(message) {
                Ok(()) => Response::Sent { id },
                Err(e) => Response::Error { reason: e.to_string() },
            }
        }
        Request::Receive { destination, timeout_ms } => {
            let message = queues
                .dequeue(&destination, Duration::from_millis(timeout_ms))
                .await;
            Response::Message { message }
        }
        Request::Stats { destination } => Response::Stats { stats: queues.stats(&destination) },
        Request::Ping => Response::Pong,
    }
}
