//! Verbindungen zum Relay (tokio-tungstenite)
//!
//! Envelopes reisen als Textframes, DH-Material und Chiffretexte des
//! Schluessel-Handshakes als Binaerframes.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use keyhub_protocol::Envelope;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ClientError, ClientResult};

/// Offene WebSocket-Verbindung zum Relay
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Endpunkt fuer den Beitritt
pub const PFAD_CONNECT: &str = "/connect";
/// Endpunkt fuer die Handshake-Verbindung des Key-Hubs
pub const PFAD_KEY_EXCHANGE: &str = "/key-exchange";
/// Endpunkt fuer den Chat
pub const PFAD_WS: &str = "/ws";

/// Host und Port des Relays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAdresse {
    pub host: String,
    pub port: u16,
}

impl RelayAdresse {
    pub fn neu(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self, pfad: &str) -> String {
        format!("ws://{}:{}{}", self.host, self.port, pfad)
    }

    /// Oeffnet eine WebSocket-Verbindung zu `pfad`
    pub async fn verbinden(&self, pfad: &str) -> ClientResult<WsStream> {
        let url = self.url(pfad);
        let (ws, _antwort) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::debug!(url = %url, "Verbindung zum Relay hergestellt");
        Ok(ws)
    }
}

/// Naechstes Envelope; `None` wenn das Relay geschlossen hat
pub async fn envelope_lesen<S>(ws: &mut S) -> ClientResult<Option<Envelope>>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(keyhub_protocol::decode(&text)?)),
            Some(Ok(Message::Binary(daten))) => {
                return Err(ClientError::unerwartet(format!(
                    "Binaerframe ({} Bytes) statt Envelope",
                    daten.len()
                )))
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Wie [`envelope_lesen`], aber ein geschlossenes Relay ist ein Fehler
pub async fn envelope_empfangen<S>(ws: &mut S) -> ClientResult<Envelope>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    envelope_lesen(ws).await?.ok_or(ClientError::Getrennt)
}

/// Naechster Binaerframe
pub async fn binaer_empfangen<S>(ws: &mut S) -> ClientResult<Vec<u8>>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(daten))) => return Ok(daten),
            Some(Ok(Message::Text(text))) => {
                return Err(ClientError::unerwartet(format!(
                    "Textframe statt Binaerframe: {text}"
                )))
            }
            Some(Ok(Message::Close(_))) | None => return Err(ClientError::Getrennt),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

pub async fn envelope_senden<S>(ws: &mut S, envelope: &Envelope) -> ClientResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = keyhub_protocol::encode(envelope)?;
    ws.send(Message::Text(text)).await?;
    Ok(())
}

pub async fn binaer_senden<S>(ws: &mut S, daten: Vec<u8>) -> ClientResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    ws.send(Message::Binary(daten)).await?;
    Ok(())
}

/// Schliesst eine Verbindung; Fehler beim Schliessen sind bedeutungslos
pub async fn schliessen(ws: &mut WsStream) {
    if let Err(e) = ws.close(None).await {
        tracing::trace!(fehler = %e, "Verbindung bereits geschlossen");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_aus_host_und_port() {
        let adresse = RelayAdresse::neu("localhost", 8080);
        assert_eq!(adresse.url(PFAD_WS), "ws://localhost:8080/ws");
        assert_eq!(
            adresse.url(PFAD_KEY_EXCHANGE),
            "ws://localhost:8080/key-exchange"
        );
    }
}
