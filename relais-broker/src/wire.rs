/**
 * PROTOCOLE FILAIRE - un objet JSON par ligne
 *
 * Client -> broker : Request (send, receive, stats, ping)
 * Broker -> client : Response (sent, message, stats, pong, error)
 *
 * Chaque requête reçoit exactement une réponse, dans l'ordre.
 */

use crate::message::Message;
use crate::queue::QueueStats;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Taille max d'une trame (4 MiB)
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame exceeds {} bytes", MAX_FRAME_BYTES)]
    FrameTooLarge,
    #[error("Connection closed by peer")]
    ConnectionClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Send { message: Message },
    Receive { destination: String, timeout_ms: u64 },
    Stats { destination: String },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    Sent { id: Uuid },
    Message { message: Option<Message> },
    Stats { stats: QueueStats },
    Pong,
    Error { reason: String },
}

/// Écrit une trame terminée par '\n' et flush
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    if line.len() >= MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge);
    }
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Lit la trame suivante ; `Ok(None)` si le pair a fermé proprement
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, WireError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    let read = reader
        .take(MAX_FRAME_BYTES as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        if line.len() > MAX_FRAME_BYTES {
            return Err(WireError::FrameTooLarge);
        }
        // EOF au milieu d'une trame
        return Err(WireError::ConnectionClosed);
    }

    Ok(Some(serde_json::from_slice(&line)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut client_tx) = tokio::io::split(client);
        let (server_rx, _) = tokio::io::split(server);
        let mut server_rx = BufReader::new(server_rx);

        write_frame(&mut client_tx, &Request::Ping).await.unwrap();
        write_frame(&mut client_tx, &Request::Receive { destination: "orders".into(), timeout_ms: 10 })
            .await
            .unwrap();
        drop(client_tx);

        let first: Option<Request> = read_frame(&mut server_rx).await.unwrap();
        assert_eq!(first, Some(Request::Ping));
        let second: Option<Request> = read_frame(&mut server_rx).await.unwrap();
        assert!(matches!(second, Some(Request::Receive { ref destination, timeout_ms: 10 }) if destination == "orders"));
        let end: Option<Request> = read_frame(&mut server_rx).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let mut reader = BufReader::new(&b"{\"op\":\"ping\""[..]);
        let result: Result<Option<Request>, _> = read_frame(&mut reader).await;
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let mut reader = BufReader::new(&b"not json\n"[..]);
        let result: Result<Option<Request>, _> = read_frame(&mut reader).await;
        assert!(matches!(result, Err(WireError::Json(_))));
    }

    #[test]
    fn test_request_shape() {
        let json = serde_json::to_value(Request::Stats { destination: "q".into() }).unwrap();
        assert_eq!(json["op"], "stats");
        assert_eq!(json["destination"], "q");
    }
}
