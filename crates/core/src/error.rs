//! Fehlertypen fuer keyhub
//!
//! Fehler der gemeinsamen Typen. Die uebrigen Crates definieren eigene
//! Fehler und konvertieren bei Bedarf.

use thiserror::Error;

/// Globaler Result-Alias fuer keyhub
pub type Result<T> = std::result::Result<T, KeyhubError>;

/// Crate-uebergreifende Fehler
#[derive(Debug, Error)]
pub enum KeyhubError {
    #[error("Ungueltige Session-ID: {0}")]
    UngueltigeSessionId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = KeyhubError::UngueltigeSessionId("3 Bytes".into());
        assert_eq!(e.to_string(), "Ungueltige Session-ID: 3 Bytes");
    }
}
