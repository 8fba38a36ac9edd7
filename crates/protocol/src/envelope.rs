//! Envelope – die getaggte Nachrichteneinheit
//!
//! Jede Nachricht auf `/connect` und `/ws` ist ein JSON-Envelope:
//!
//! ```text
//! {"username": "alice", "message": "hallo", "messageType": 0, "data": "<base64>"}
//! ```
//!
//! ## Design
//! - `messageType` ist eine Ganzzahl: 0 = Text, 1 = Command, 2 = Info
//! - `Command`- und `Info`-Bodies stammen aus einem festen Vokabular
//! - Der optionale Binaer-Payload wird als Base64 uebertragen
//! - Text-Bodies sind fuer das Relay opak (hex-kodierter Chiffretext)

use keyhub_core::types::{PeerId, PEER_ID_LAENGE};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Absendername fuer alle vom Relay erzeugten Envelopes
pub const SERVER_ABSENDER: &str = "server";

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Nachrichtentyp eines Envelopes (auf dem Draht als Ganzzahl)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    /// Chat-Text (verschluesselt, wird an alle anderen Peers verteilt)
    Text,
    /// Anweisung an einen Peer
    Command,
    /// Protokoll-Steuerung (Join, Handshake-Ergebnis)
    Info,
}

impl From<MessageType> for u8 {
    fn from(typ: MessageType) -> Self {
        match typ {
            MessageType::Text => 0,
            MessageType::Command => 1,
            MessageType::Info => 2,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(wert: u8) -> Result<Self, Self::Error> {
        match wert {
            0 => Ok(Self::Text),
            1 => Ok(Self::Command),
            2 => Ok(Self::Info),
            andere => Err(ProtocolError::UnbekannterTyp(andere)),
        }
    }
}

// ---------------------------------------------------------------------------
// Befehls- und Info-Vokabular
// ---------------------------------------------------------------------------

/// Festes Befehlsvokabular (`Command`-Envelopes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Relay -> Key-Hub: neue Handshake-Verbindung oeffnen
    ExchangeKeys,
    /// Relay -> Key-Hub (Handshake-Verbindung): Raum-Schluessel verschluesselt senden
    ShareRoomKey,
    /// Relay -> erster Key-Hub: Raum-Schluessel erzeugen
    GenerateKeys,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExchangeKeys => "exchange-keys",
            Self::ShareRoomKey => "share-room-key",
            Self::GenerateKeys => "generate-keys",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exchange-keys" => Ok(Self::ExchangeKeys),
            "share-room-key" => Ok(Self::ShareRoomKey),
            "generate-keys" => Ok(Self::GenerateKeys),
            other => Err(ProtocolError::UnbekannterBefehl(other.to_string())),
        }
    }
}

/// Festes Info-Vokabular (`Info`-Envelopes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Info {
    /// Peer -> Relay: Beitritt, Payload = 16-Byte Session-ID
    Join,
    /// Peer -> Relay: Raum-Schluessel verloren, Handshake-Flag zuruecksetzen
    KeyExchange,
    /// Raum-Schluessel als hex-Chiffretext im Payload
    RoomKey,
    /// Relay -> Peer: Beitritt fertig, Peer ist Key-Hub
    KeyHubJoinDone,
    /// Relay -> Peer: Handshake auf dieser Verbindung folgt
    ContinueLogin,
}

impl Info {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::KeyExchange => "ke",
            Self::RoomKey => "rk",
            Self::KeyHubJoinDone => "kh-join-done",
            Self::ContinueLogin => "cl",
        }
    }
}

impl std::fmt::Display for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Info {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(Self::Join),
            "ke" => Ok(Self::KeyExchange),
            "rk" => Ok(Self::RoomKey),
            "kh-join-done" => Ok(Self::KeyHubJoinDone),
            "cl" => Ok(Self::ContinueLogin),
            other => Err(ProtocolError::UnbekannteInfo(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Nachrichteneinheit zwischen Peer und Relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Absender (Anzeigename, `server` fuer Relay-Nachrichten)
    pub username: String,
    /// Befehlsname, Info-Name oder opaker Text
    pub message: String,
    /// Nachrichtentyp
    #[serde(rename = "messageType")]
    pub message_type: MessageType,
    /// Optionaler Binaer-Payload (Session-ID, Chiffretext)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_payload"
    )]
    pub data: Option<Vec<u8>>,
}

/// Typisierte Sicht auf ein Envelope nach Vokabular-Pruefung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nachricht {
    Text(String),
    Command(Command),
    Info { info: Info, data: Option<Vec<u8>> },
}

impl Envelope {
    /// Erstellt einen Chat-Text
    pub fn text(username: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: body.into(),
            message_type: MessageType::Text,
            data: None,
        }
    }

    /// Erstellt einen Relay-Befehl
    pub fn command(command: Command) -> Self {
        Self {
            username: SERVER_ABSENDER.to_string(),
            message: command.as_str().to_string(),
            message_type: MessageType::Command,
            data: None,
        }
    }

    /// Erstellt eine Info-Nachricht
    pub fn info(username: impl Into<String>, info: Info, data: Option<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            message: info.as_str().to_string(),
            message_type: MessageType::Info,
            data,
        }
    }

    /// Erstellt eine Relay-Info ohne Payload
    pub fn server_info(info: Info) -> Self {
        Self::info(SERVER_ABSENDER, info, None)
    }

    /// Erstellt das `join`-Envelope mit der Session-ID als Payload
    pub fn join(username: impl Into<String>, peer_id: PeerId) -> Self {
        Self::info(username, Info::Join, Some(peer_id.als_bytes().to_vec()))
    }

    /// Prueft Vokabular und Payload-Form und gibt die typisierte Sicht zurueck
    pub fn klassifizieren(&self) -> ProtocolResult<Nachricht> {
        match self.message_type {
            MessageType::Text => Ok(Nachricht::Text(self.message.clone())),
            MessageType::Command => Ok(Nachricht::Command(self.message.parse()?)),
            MessageType::Info => {
                let info: Info = self.message.parse()?;
                match info {
                    Info::Join => {
                        let laenge = self.data.as_ref().map(Vec::len).unwrap_or(0);
                        if laenge != PEER_ID_LAENGE {
                            return Err(ProtocolError::UngueltigerPayload {
                                info: "join",
                                grund: format!(
                                    "erwartet {} Bytes Session-ID, erhalten {}",
                                    PEER_ID_LAENGE, laenge
                                ),
                            });
                        }
                    }
                    Info::RoomKey => {
                        if self.data.as_ref().map_or(true, Vec::is_empty) {
                            return Err(ProtocolError::UngueltigerPayload {
                                info: "rk",
                                grund: "Chiffretext fehlt".to_string(),
                            });
                        }
                    }
                    Info::KeyExchange | Info::KeyHubJoinDone | Info::ContinueLogin => {}
                }
                Ok(Nachricht::Info {
                    info,
                    data: self.data.clone(),
                })
            }
        }
    }

    /// Liest die Session-ID aus einem `join`-Envelope
    ///
    /// Jede andere Nachricht ist an dieser Stelle ein Protokollfehler.
    pub fn join_id(&self) -> ProtocolResult<PeerId> {
        match self.klassifizieren()? {
            Nachricht::Info {
                info: Info::Join,
                data: Some(bytes),
            } => PeerId::aus_bytes(&bytes).map_err(|e| ProtocolError::UngueltigerPayload {
                info: "join",
                grund: e.to_string(),
            }),
            andere => Err(ProtocolError::unerwartet(format!(
                "join erwartet, erhalten: {:?}",
                andere
            ))),
        }
    }

    /// Prueft ob dieses Envelope genau der angegebene Befehl ist
    pub fn ist_befehl(&self, command: Command) -> bool {
        self.message_type == MessageType::Command && self.message == command.as_str()
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.username, self.message)
    }
}

/// Serde-Adapter: `Option<Vec<u8>>` <-> Base64-String
mod base64_payload {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| STANDARD.decode(t.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
