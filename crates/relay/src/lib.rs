//! keyhub-relay – WebSocket-Relay fuer Ende-zu-Ende-verschluesselten Gruppenchat
//!
//! Das Relay leitet nur opake Chiffretexte und kleine Steuer-Nachrichten
//! weiter. Den Raum-Schluessel sieht es nie im Klartext.
//!
//! ## Architektur
//!
//! ```text
//! axum (RelayServer)
//!     |
//!     +-- /connect       -> MembershipRegistry::pending_aufnehmen
//!     |                     -> kh-join-done | cl + HandshakeCoordinator
//!     +-- /key-exchange  -> HandshakeCoordinator::zuteilen
//!     +-- /ws            -> MembershipRegistry::aktivieren
//!                           Lese-Task -> Router (Dispatcher-Task)
//!                           Schreib-Task <- Ausgangs-Queue des Peers
//!
//! MembershipRegistry – Peers, Phasen, Key-Hub (ein Lock)
//! Router             – Zustellung an aktive Peers (Snapshot)
//! ```

pub mod error;
pub mod handlers;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod transport;

// Bequeme Re-Exporte
pub use error::{RelayError, RelayResult};
pub use handshake::{negotiate, HandshakeCoordinator, HandshakeFehler, RawChannel, Seite};
pub use registry::{MembershipRegistry, Route, Trennung};
pub use router::{Einreihung, PeerSender, Router, Zustellung, Zustellbericht};
pub use server::RelayServer;
pub use session::{PeerPhase, PeerSession};
pub use state::{RelayConfig, RelayState};
pub use transport::WsKanal;
