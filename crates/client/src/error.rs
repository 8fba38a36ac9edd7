//! Fehlertypen fuer die Peer-Seite

use keyhub_crypto::CryptoError;
use keyhub_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Fehlertyp fuer den Client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Verbindungsaufbau oder Lesen/Schreiben fehlgeschlagen
    #[error("WebSocket-Fehler: {0}")]
    Verbindung(#[from] tungstenite::Error),

    /// Relay hat die Verbindung geschlossen
    #[error("Verbindung vom Relay getrennt")]
    Getrennt,

    /// Ungueltiges Envelope
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtocolError),

    /// Frame oder Nachricht passt nicht zum Protokollschritt
    #[error("Unerwartete Nachricht: {0}")]
    Unerwartet(String),

    /// Schluesselaustausch oder Entschluesselung fehlgeschlagen
    #[error("Kryptografie-Fehler: {0}")]
    Krypto(#[from] CryptoError),

    /// Ohne Raum-Schluessel kann nicht gesendet werden
    #[error("Kein Raum-Schluessel vorhanden")]
    KeinRaumSchluessel,
}

impl ClientError {
    pub fn unerwartet(msg: impl Into<String>) -> Self {
        Self::Unerwartet(msg.into())
    }
}

/// Result-Typ fuer den Client
pub type ClientResult<T> = Result<T, ClientError>;
