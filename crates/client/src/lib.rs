//! # keyhub-client
//!
//! Peer-Seite von keyhub.
//!
//! ## Module
//! - `connection` - WebSocket-Verbindungen zum Relay und Frame-Helfer
//! - `join` - Beitritt ueber `/connect`
//! - `key_share` - Schluessel-Handshake (Key-Hub- und Beitretenden-Haelfte)
//! - `session` - Chat-Sitzung mit Ver- und Entschluesselung
//! - `error` - Fehlertypen

pub mod connection;
pub mod error;
pub mod join;
pub mod key_share;
pub mod session;

pub use connection::{RelayAdresse, WsStream, PFAD_CONNECT, PFAD_KEY_EXCHANGE, PFAD_WS};
pub use error::{ClientError, ClientResult};
pub use join::{beitreten, Beitritt};
pub use key_share::{hub_handshake, schluessel_empfangen, schluessel_teilen};
pub use session::{ChatClient, ChatEreignis};
