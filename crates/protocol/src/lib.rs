//! keyhub-protocol – Envelope-Protokoll
//!
//! Dieses Crate definiert das getaggte Nachrichtenformat (`Text`, `Command`,
//! `Info`), das Peers und Relay ueber die Chat- und Join-Verbindungen
//! austauschen, samt festem Befehls- und Info-Vokabular und JSON-Codec.

pub mod envelope;
pub mod error;
pub mod wire;

pub use envelope::{Command, Envelope, Info, MessageType, Nachricht, SERVER_ABSENDER};
pub use error::{ProtocolError, ProtocolResult};
pub use wire::{decode, encode};
