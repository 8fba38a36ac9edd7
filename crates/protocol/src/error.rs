//! Fehlertypen fuer das Envelope-Protokoll

use thiserror::Error;

/// Protokollfehler (fehlerhafte oder unerwartete Envelopes)
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope zu gross: {groesse} Bytes (Maximum: {maximum} Bytes)")]
    ZuGross { groesse: usize, maximum: usize },

    #[error("Unbekannter Nachrichtentyp: {0}")]
    UnbekannterTyp(u8),

    #[error("Unbekannter Befehl: '{0}'")]
    UnbekannterBefehl(String),

    #[error("Unbekannte Info: '{0}'")]
    UnbekannteInfo(String),

    #[error("Ungueltiger Payload fuer '{info}': {grund}")]
    UngueltigerPayload { info: &'static str, grund: String },

    #[error("Unerwartete Nachricht: {0}")]
    Unerwartet(String),
}

impl ProtocolError {
    /// Erstellt einen Fehler fuer eine an dieser Stelle unerwartete Nachricht
    pub fn unerwartet(msg: impl Into<String>) -> Self {
        Self::Unerwartet(msg.into())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
