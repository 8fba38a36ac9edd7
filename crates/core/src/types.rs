//! Identifikationstypen fuer keyhub
//!
//! Die Session-ID eines Peers verwendet das Newtype-Pattern, damit sie zur
//! Compilezeit nicht mit anderen UUIDs verwechselt werden kann.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KeyhubError;

/// Laenge der Session-ID im Binaerformat (128 Bit)
pub const PEER_ID_LAENGE: usize = 16;

/// Zufaellige 128-Bit Session-ID eines Peers
///
/// Wird clientseitig beim ersten Kontakt erzeugt und im `join`-Envelope
/// als Binaer-Payload uebertragen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Erstellt eine neue zufaellige PeerId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Binaerform (16 Bytes, Big-Endian wie `Uuid::as_bytes`)
    pub fn als_bytes(&self) -> [u8; PEER_ID_LAENGE] {
        *self.0.as_bytes()
    }

    /// Liest eine PeerId aus dem Binaer-Payload eines `join`-Envelopes
    pub fn aus_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Uuid::from_slice(bytes).map(Self).map_err(|_| {
            KeyhubError::UngueltigeSessionId(format!(
                "erwartet {} Bytes, erhalten: {}",
                PEER_ID_LAENGE,
                bytes.len()
            ))
        })
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_eindeutig() {
        let a = PeerId::new();
        let b = PeerId::new();
        assert_ne!(a, b, "Zwei neue PeerIds muessen verschieden sein");
    }

    #[test]
    fn peer_id_display() {
        let id = PeerId(Uuid::nil());
        assert!(id.to_string().starts_with("peer:"));
    }

    #[test]
    fn peer_id_aus_binaerform() {
        let id = PeerId::new();
        let bytes = id.als_bytes();
        assert_eq!(PeerId::aus_bytes(&bytes).unwrap(), id);
    }

    #[test]
    fn peer_id_falsche_laenge_wird_abgelehnt() {
        assert!(PeerId::aus_bytes(&[1, 2, 3]).is_err());
        assert!(PeerId::aus_bytes(&[]).is_err());
        assert!(PeerId::aus_bytes(&[0u8; 17]).is_err());
    }

    #[test]
    fn peer_id_ist_serde_kompatibel() {
        let id = PeerId::new();
        let json = serde_json::to_string(&id).unwrap();
        let zurueck: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, zurueck);
    }
}
