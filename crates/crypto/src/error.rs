//! Fehlertypen fuer das Kryptografie-Subsystem

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
///
/// Kryptofehler betreffen immer nur die einzelne Nachricht, nie die Verbindung.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Chiffretext zu kurz: mindestens {minimum} Bytes, erhalten {erhalten}")]
    ChiffretextZuKurz { minimum: usize, erhalten: usize },

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Hex-Dekodierung fehlgeschlagen: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Primzahl-Generierung fehlgeschlagen: {0}")]
    PrimzahlGenerierung(String),

    #[error("Key-Exchange fehlgeschlagen: {0}")]
    KeyExchange(String),

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
