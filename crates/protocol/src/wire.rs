//! Wire-Format fuer WebSocket-Textframes
//!
//! Ein Envelope entspricht genau einem Textframe mit JSON-Inhalt.
//! Binaerframes (DH-Material, Chiffretext) werden nicht hier, sondern direkt
//! auf der Handshake-Verbindung verarbeitet.

use crate::envelope::Envelope;
use crate::error::{ProtocolError, ProtocolResult};

/// Maximale Groesse eines Envelope-Frames (1 MB)
pub const MAX_ENVELOPE_GROESSE: usize = 1024 * 1024;

/// Kodiert ein Envelope als JSON-Text
pub fn encode(envelope: &Envelope) -> ProtocolResult<String> {
    let text = serde_json::to_string(envelope)?;
    if text.len() > MAX_ENVELOPE_GROESSE {
        return Err(ProtocolError::ZuGross {
            groesse: text.len(),
            maximum: MAX_ENVELOPE_GROESSE,
        });
    }
    Ok(text)
}

/// Dekodiert ein Envelope aus JSON-Text
pub fn decode(text: &str) -> ProtocolResult<Envelope> {
    if text.len() > MAX_ENVELOPE_GROESSE {
        return Err(ProtocolError::ZuGross {
            groesse: text.len(),
            maximum: MAX_ENVELOPE_GROESSE,
        });
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Command, MessageType};

    #[test]
    fn go_kompatibles_envelope_dekodieren() {
        // Feldnamen und Ganzzahl-Typ wie vom bestehenden Client gesendet
        let json = r#"{"username":"PabloDebug","message":"exchange-keys","messageType":1}"#;
        let env = decode(json).unwrap();
        assert_eq!(env.message_type, MessageType::Command);
        assert!(env.ist_befehl(Command::ExchangeKeys));
    }

    #[test]
    fn kaputtes_json_ist_fehler() {
        assert!(matches!(decode("{nicht json"), Err(ProtocolError::Json(_))));
        assert!(decode(r#"{"username":"a"}"#).is_err());
    }

    #[test]
    fn zu_grosses_envelope_wird_abgelehnt() {
        let riesig = Envelope::text("a", "x".repeat(MAX_ENVELOPE_GROESSE + 1));
        assert!(matches!(encode(&riesig), Err(ProtocolError::ZuGross { .. })));

        let text = "y".repeat(MAX_ENVELOPE_GROESSE + 1);
        assert!(matches!(decode(&text), Err(ProtocolError::ZuGross { .. })));
    }

    #[test]
    fn text_bleibt_opak() {
        let env = Envelope::text("alice", "00ff13ab");
        let zurueck = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(zurueck, env);
    }
}
