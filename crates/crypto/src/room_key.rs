//! Raum-Schluessel
//!
//! Ein 256-Bit-Schluessel, den alle aktiven Peers teilen. Der Key-Hub
//! erzeugt ihn lazy beim ersten Bedarf und verteilt ihn verschluesselt
//! unter dem paarweisen Transport-Schluessel an neue Peers.

use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::cipher::{self, SCHLUESSEL_LAENGE};
use crate::dh::SharedSecret;
use crate::error::{CryptoError, CryptoResult};
use crate::types::SecretBytes;

/// Gemeinsamer symmetrischer Schluessel eines Raums
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomKey(SecretBytes);

impl RoomKey {
    /// Wuerfelt einen neuen Schluessel aus dem System-CSPRNG
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SCHLUESSEL_LAENGE];
        OsRng.fill_bytes(&mut bytes);
        Self(SecretBytes::new(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() != SCHLUESSEL_LAENGE {
            return Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: SCHLUESSEL_LAENGE,
                erhalten: bytes.len(),
            });
        }
        Ok(Self(SecretBytes::new(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Verschluesselt einen Chat-Text (hex-kodiert)
    pub fn encrypt_text(&self, text: &str) -> CryptoResult<String> {
        cipher::encrypt(text.as_bytes(), self.as_bytes())
    }

    /// Entschluesselt einen Chat-Text; ungueltiges UTF-8 wird ersetzt
    pub fn decrypt_text(&self, chiffre: &str) -> CryptoResult<String> {
        let klartext = cipher::decrypt(chiffre, self.as_bytes())?;
        Ok(String::from_utf8_lossy(&klartext).into_owned())
    }

    /// Verpackt den Schluessel fuer einen Beitretenden
    pub fn wrap(&self, psk: &SharedSecret) -> CryptoResult<String> {
        let transport = psk.transport_key()?;
        cipher::encrypt(self.as_bytes(), transport.as_bytes())
    }

    /// Packt einen vom Key-Hub empfangenen Schluessel aus
    pub fn unwrap(verpackt: &str, psk: &SharedSecret) -> CryptoResult<Self> {
        let transport = psk.transport_key()?;
        let bytes = cipher::decrypt(verpackt, transport.as_bytes())?;
        Self::from_bytes(bytes)
    }
}

// ---------------------------------------------------------------------------
// RoomKeySlot
// ---------------------------------------------------------------------------

/// Platz fuer den Raum-Schluessel eines Peers
///
/// Leer bis der Peer Key-Hub wird (dann lazy erzeugt) oder den Schluessel
/// im Handshake erhaelt.
#[derive(Debug, Default)]
pub struct RoomKeySlot {
    inner: RwLock<Option<RoomKey>>,
}

impl RoomKeySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<RoomKey> {
        self.inner.read().clone()
    }

    /// Liefert den vorhandenen Schluessel oder erzeugt genau einen neuen
    pub fn get_or_generate(&self) -> RoomKey {
        if let Some(key) = self.inner.read().as_ref() {
            return key.clone();
        }
        let mut slot = self.inner.write();
        slot.get_or_insert_with(|| {
            tracing::info!("Neuer Raum-Schluessel erzeugt");
            RoomKey::generate()
        })
        .clone()
    }

    pub fn set(&self, key: RoomKey) {
        *self.inner.write() = Some(key);
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}
