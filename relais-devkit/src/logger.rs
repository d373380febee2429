/*!
Journalisation injectable du harness

Le harness ne logge jamais directement : il passe par un `HarnessLogger`.
- `LogFacade` relaie vers la crate `log` (défaut)
- `RecordingLogger` garde les entrées en mémoire pour les assertions de tests
*/

use log::Level;
use parking_lot::Mutex;
use std::sync::Arc;

pub trait HarnessLogger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }
}

/// Relais vers le facade `log` (cible `relais_devkit::harness`)
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl HarnessLogger for LogFacade {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "relais_devkit::harness", level, "{}", message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

/// Logger qui enregistre tout ce qu'il reçoit (clonable, état partagé)
#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Messages de niveau `level` exactement
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.level == level)
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.level == level && entry.message.contains(needle))
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl HarnessLogger for RecordingLogger {
    fn log(&self, level: Level, message: &str) {
        self.entries.lock().push(LogEntry {
            level,
            message: message.to_string(),
        });
    }
}
