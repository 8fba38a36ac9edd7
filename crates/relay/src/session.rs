//! Peer-Session – Zustandsmaschine pro Peer
//!
//! ## State Machine
//! ```text
//! Pending -> AwaitingHandshake -> Active
//!    |                              ^
//!    +------ (reservierter Hub) ----+
//!
//! jeder Zustand -> Disconnected
//! ```
//!
//! `is_key_hub` ist ein orthogonales Flag. Ein Peer kann den Hub-Status
//! verlieren ohne den Raum zu verlassen.

use keyhub_core::PeerId;

use crate::error::{RelayError, RelayResult};
use crate::router::PeerSender;

// ---------------------------------------------------------------------------
// PeerPhase
// ---------------------------------------------------------------------------

/// Mitgliedschafts-Phase eines Peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    /// Join-Verbindung offen, Route noch nicht entschieden
    Pending,
    /// Wartet auf bzw. durchlaeuft den DH-Handshake mit dem Key-Hub
    AwaitingHandshake,
    /// Im Broadcast-Set, empfaengt Chat-Texte
    Active,
    /// Verbindung verloren, Datensatz wird entfernt
    Disconnected,
}

impl std::fmt::Display for PeerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::AwaitingHandshake => "awaiting-handshake",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

/// Registry-Datensatz eines Peers
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub id: PeerId,
    /// Eindeutige Nummer dieses Datensatzes (unterscheidet Reconnects)
    pub sitzung: u64,
    pub phase: PeerPhase,
    pub is_key_hub: bool,
    pub handshake_complete: bool,
    /// Aktivierungsreihenfolge, Grundlage der Hub-Wahl
    pub(crate) aktiv_seit: Option<u64>,
    /// Ausgangs-Queue der Chat-Verbindung (nur in `Active`)
    pub(crate) sender: Option<PeerSender>,
}

impl PeerSession {
    pub fn neu(id: PeerId, sitzung: u64) -> Self {
        Self {
            id,
            sitzung,
            phase: PeerPhase::Pending,
            is_key_hub: false,
            handshake_complete: false,
            aktiv_seit: None,
            sender: None,
        }
    }

    /// Reserviert den Hub-Status fuer einen Peer, der ohne Handshake beitritt
    pub fn als_hub_reservieren(&mut self) {
        self.is_key_hub = true;
    }

    pub fn handshake_erwarten(&mut self) {
        if self.phase == PeerPhase::Pending {
            self.phase = PeerPhase::AwaitingHandshake;
        }
    }

    /// Raum-Schluessel erfolgreich uebertragen
    pub fn handshake_abschliessen(&mut self) -> RelayResult<()> {
        if self.phase != PeerPhase::AwaitingHandshake {
            return Err(RelayError::NichtBereit(self.id));
        }
        self.handshake_complete = true;
        Ok(())
    }

    /// Darf die Chat-Verbindung eroeffnen
    pub fn ist_bereit(&self) -> bool {
        match self.phase {
            PeerPhase::Pending => self.is_key_hub,
            PeerPhase::AwaitingHandshake => self.handshake_complete,
            PeerPhase::Active | PeerPhase::Disconnected => false,
        }
    }

    /// Uebergang nach `Active` mit der Ausgangs-Queue der Chat-Verbindung
    pub fn aktivieren(&mut self, reihenfolge: u64, sender: PeerSender) -> RelayResult<()> {
        if !self.ist_bereit() {
            return Err(RelayError::NichtBereit(self.id));
        }
        if self.is_key_hub {
            // Der Hub erzeugt den Raum-Schluessel selbst
            self.handshake_complete = true;
        }
        self.phase = PeerPhase::Active;
        self.aktiv_seit = Some(reihenfolge);
        self.sender = Some(sender);
        Ok(())
    }

    pub fn ist_aktiv(&self) -> bool {
        self.phase == PeerPhase::Active
    }

    /// Endzustand; die Ausgangs-Queue wird freigegeben
    pub fn trennen(&mut self) {
        self.phase = PeerPhase::Disconnected;
        self.is_key_hub = false;
        self.sender = None;
    }
}
