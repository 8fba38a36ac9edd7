//! Fehlertypen fuer das Relay

use keyhub_core::PeerId;
use keyhub_protocol::ProtocolError;
use thiserror::Error;

/// Fehlertyp fuer das Relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO-Fehler (Listener, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Lese- oder Schreibfehler auf einer WebSocket-Verbindung
    #[error("Transportfehler: {0}")]
    Transport(String),

    /// Gegenseite hat die Verbindung geschlossen
    #[error("Verbindung getrennt")]
    Getrennt,

    /// Ein Handshake-Schritt hat sein Zeitlimit ueberschritten
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(&'static str),

    /// Ungueltiges Envelope oder unerwarteter Frame
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtocolError),

    /// Peer ist nicht (mehr) in der Registry
    #[error("Unbekannter Peer: {0}")]
    UnbekannterPeer(PeerId),

    /// Peer hat weder Hub-Reservierung noch abgeschlossenen Handshake
    #[error("Peer {0} ist noch nicht bereit fuer den Chat")]
    NichtBereit(PeerId),

    /// Der Zustell-Task laeuft nicht mehr
    #[error("Dispatcher beendet")]
    DispatcherBeendet,
}

impl RelayError {
    /// Erstellt einen Transportfehler
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Erstellt einen Protokollfehler fuer einen unerwarteten Frame
    pub fn unerwartet(msg: impl Into<String>) -> Self {
        Self::Protokoll(ProtocolError::unerwartet(msg))
    }

    /// Transportfehler beenden die Verbindung, auf der sie auftreten
    pub fn ist_transportfehler(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Transport(_) | Self::Getrennt | Self::Zeitlimit(_)
        )
    }
}

/// Result-Typ fuer das Relay
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transportfehler_erkennen() {
        assert!(RelayError::Getrennt.ist_transportfehler());
        assert!(RelayError::Zeitlimit("hub").ist_transportfehler());
        assert!(!RelayError::unerwartet("text statt binaer").ist_transportfehler());
        assert!(!RelayError::NichtBereit(PeerId::new()).ist_transportfehler());
    }
}
