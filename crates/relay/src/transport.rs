//! WebSocket-Anbindung (axum)
//!
//! - [`WsKanal`]: ungeteilte Verbindung fuer `/connect` und `/key-exchange`
//! - [`naechstes_envelope`] / [`schreiber`]: Lese- und Schreibhaelfte der
//!   Chat-Verbindung `/ws`

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use keyhub_protocol::Envelope;
use tokio::sync::mpsc;

use crate::error::{RelayError, RelayResult};
use crate::handshake::RawChannel;

/// Liest das naechste Envelope; `None` wenn die Gegenseite geschlossen hat
pub async fn naechstes_envelope<S>(stream: &mut S) -> RelayResult<Option<Envelope>>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(keyhub_protocol::decode(&text)?)),
            Some(Ok(Message::Binary(daten))) => {
                return Err(RelayError::unerwartet(format!(
                    "Binaerframe ({} Bytes) statt Envelope",
                    daten.len()
                )))
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Err(e)) => return Err(RelayError::transport(e.to_string())),
        }
    }
}

/// Einziger Schreiber einer Chat-Verbindung
///
/// Leert die Ausgangs-Queue bis sie geschlossen wird und sendet dann einen
/// Close-Frame. Ein Schreibfehler beendet den Task mit `Err`.
pub async fn schreiber<S>(mut sink: S, mut rx: mpsc::Receiver<Envelope>) -> RelayResult<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        let text = match keyhub_protocol::encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(fehler = %e, "Envelope nicht kodierbar, verworfen");
                continue;
            }
        };
        sink.send(Message::Text(text))
            .await
            .map_err(|e| RelayError::transport(e.to_string()))?;
    }
    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// WsKanal
// ---------------------------------------------------------------------------

/// Join- bzw. Handshake-Verbindung
pub struct WsKanal {
    socket: WebSocket,
}

impl WsKanal {
    pub fn neu(socket: WebSocket) -> Self {
        Self { socket }
    }

    pub async fn recv_envelope(&mut self) -> RelayResult<Option<Envelope>> {
        naechstes_envelope(&mut self.socket).await
    }
}

impl RawChannel for WsKanal {
    async fn recv_binary(&mut self) -> RelayResult<Vec<u8>> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Binary(daten))) => return Ok(daten),
                Some(Ok(Message::Text(text))) => {
                    return Err(RelayError::unerwartet(format!(
                        "Textframe ({} Bytes) statt Binaerframe",
                        text.len()
                    )))
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(RelayError::Getrennt),
                Some(Err(e)) => return Err(RelayError::transport(e.to_string())),
            }
        }
    }

    async fn send_binary(&mut self, daten: Vec<u8>) -> RelayResult<()> {
        self.socket
            .send(Message::Binary(daten))
            .await
            .map_err(|e| RelayError::transport(e.to_string()))
    }

    async fn send_envelope(&mut self, envelope: &Envelope) -> RelayResult<()> {
        let text = keyhub_protocol::encode(envelope)?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| RelayError::transport(e.to_string()))
    }

    async fn schliessen(&mut self) {
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            tracing::trace!(fehler = %e, "Close-Frame nicht gesendet");
        }
    }
}
