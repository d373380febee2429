/**
 * FILES POINT-À-POINT
 *
 * Une file FIFO par destination, créée au premier usage.
 * Les lecteurs bloqués attendent sur un Notify commun, réveillé à chaque
 * dépôt et à la fermeture du registre.
 */

use crate::message::Message;
use crate::state::{new_state, Shared};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub destination: String,
    pub depth: usize,
    pub enqueued: u64,
    pub dequeued: u64,
}

#[derive(Debug, Default)]
struct Destination {
    messages: VecDeque<Message>,
    enqueued: u64,
    dequeued: u64,
}

#[derive(Debug, Default)]
struct Queues {
    destinations: HashMap<String, Destination>,
    closed: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue registry is closed")]
    Closed,
}

/// Registre de toutes les files d'un broker (clonable, partagé par les sessions)
#[derive(Debug, Clone, Default)]
pub struct QueueRegistry {
    queues: Shared<Queues>,
    notify: Arc<Notify>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            queues: new_state(Queues::default()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Dépose un message en fin de file
    pub fn enqueue(&self, message: Message) -> Result<(), QueueError> {
        {
            let mut queues = self.queues.lock();
            if queues.closed {
                return Err(QueueError::Closed);
            }
            let destination = queues
                .destinations
                .entry(message.destination.clone())
                .or_default();
            destination.enqueued += 1;
            destination.messages.push_back(message);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Retire le premier message sans attendre
    pub fn try_dequeue(&self, destination: &str) -> Option<Message> {
        let mut queues = self.queues.lock();
        let queue = queues.destinations.get_mut(destination)?;
        let message = queue.messages.pop_front()?;
        queue.dequeued += 1;
        Some(message)
    }

    /// Retire le premier message, en attendant au plus `wait` (sans borne si la date déborde)
    pub async fn dequeue(&self, destination: &str, wait: Duration) -> Option<Message> {
        let deadline = Instant::now().checked_add(wait);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // s'inscrire avant de regarder la file, sinon un dépôt concurrent est perdu
            notified.as_mut().enable();

            if let Some(message) = self.try_dequeue(destination) {
                return Some(message);
            }
            if self.is_closed() {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_dequeue(destination);
                    }
                }
                None => notified.await,
            }
        }
    }

    pub fn stats(&self, destination: &str) -> QueueStats {
        let queues = self.queues.lock();
        match queues.destinations.get(destination) {
            Some(queue) => QueueStats {
                destination: destination.to_string(),
                depth: queue.messages.len(),
                enqueued: queue.enqueued,
                dequeued: queue.dequeued,
            },
            None => QueueStats {
                destination: destination.to_string(),
                depth: 0,
                enqueued: 0,
                dequeued: 0,
            },
        }
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().destinations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Ferme le registre : vide les files et réveille tous les lecteurs
    pub fn close(&self) {
        {
            let mut queues = self.queues.lock();
            queues.closed = true;
            queues.destinations.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.queues.lock().closed
    }
}
