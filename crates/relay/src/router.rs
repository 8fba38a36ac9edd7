//! Router/Dispatcher – serialisierte Zustellung an aktive Peers
//!
//! Alle Lese-Tasks reichen Zustellungen in eine gemeinsame Queue ein. Ein
//! einzelner Dispatcher-Task verteilt sie anhand eines Registry-Snapshots
//! auf die Ausgangs-Queues der Peers. Jede Chat-Verbindung hat genau einen
//! Schreib-Task, der ihre Queue leert.
//!
//! ## Zustellregeln
//! - `Broadcast`: an alle aktiven Peers ausser dem Absender
//! - `AnPeer`: an genau einen aktiven Peer (Relay-Befehle)

use keyhub_core::PeerId;
use keyhub_protocol::Envelope;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{RelayError, RelayResult};
use crate::registry::{MembershipRegistry, Trennung};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Groesse der Ausgangs-Queue pro Peer
pub const AUSGANGS_QUEUE_GROESSE: usize = 256;

/// Groesse der gemeinsamen Zustell-Queue
const ZUSTELL_QUEUE_GROESSE: usize = 1024;

// ---------------------------------------------------------------------------
// PeerSender
// ---------------------------------------------------------------------------

/// Handle auf die Ausgangs-Queue einer Chat-Verbindung
#[derive(Clone, Debug)]
pub struct PeerSender {
    pub peer_id: PeerId,
    tx: mpsc::Sender<Envelope>,
}

impl PeerSender {
    pub fn neu(peer_id: PeerId, tx: mpsc::Sender<Envelope>) -> Self {
        Self { peer_id, tx }
    }

    /// Reiht ein Envelope nicht-blockierend ein
    pub fn senden(&self, envelope: Envelope) -> Einreihung {
        match self.tx.try_send(envelope) {
            Ok(()) => Einreihung::Eingereiht,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(peer = %self.peer_id, "Ausgangs-Queue voll, Peer wird getrennt");
                Einreihung::Voll
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(peer = %self.peer_id, "Ausgangs-Queue geschlossen (Peer getrennt)");
                Einreihung::Geschlossen
            }
        }
    }

    /// Beide Handles zeigen auf dieselbe Ausgangs-Queue
    pub fn gleiche_queue(&self, andere: &PeerSender) -> bool {
        self.tx.same_channel(&andere.tx)
    }
}

/// Ergebnis von [`PeerSender::senden`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Einreihung {
    Eingereiht,
    /// Empfaenger liest nicht schnell genug; gilt als Zustellfehler
    Voll,
    /// Schreib-Task ist bereits beendet
    Geschlossen,
}

// ---------------------------------------------------------------------------
// Zustellung
// ---------------------------------------------------------------------------

/// Auftrag an den Dispatcher
#[derive(Debug, Clone)]
pub enum Zustellung {
    /// Chat-Text an alle aktiven Peers ausser dem Absender
    Broadcast { absender: PeerId, envelope: Envelope },
    /// Relay-Nachricht an einen einzelnen Peer
    AnPeer { ziel: PeerId, envelope: Envelope },
}

/// Ergebnis einer Verteilung
#[derive(Debug, Default)]
pub struct Zustellbericht {
    pub eingereiht: usize,
    /// Empfaenger mit voller Queue, die getrennt werden muessen
    pub ueberlastet: Vec<PeerSender>,
}

impl Zustellbericht {
    fn erfassen(&mut self, sender: &PeerSender, einreihung: Einreihung) {
        match einreihung {
            Einreihung::Eingereiht => self.eingereiht += 1,
            Einreihung::Voll => self.ueberlastet.push(sender.clone()),
            Einreihung::Geschlossen => {}
        }
    }
}

/// Verteilt eine Zustellung auf die Ausgangs-Queues
///
/// Arbeitet auf einem Snapshot, damit gleichzeitige Aufnahmen den Absender
/// nicht blockieren.
pub fn zustellen(registry: &MembershipRegistry, zustellung: Zustellung) -> Zustellbericht {
    let mut bericht = Zustellbericht::default();
    match zustellung {
        Zustellung::Broadcast { absender, envelope } => {
            let empfaenger = registry.aktive_empfaenger();
            for sender in empfaenger.iter().filter(|s| s.peer_id != absender) {
                bericht.erfassen(sender, sender.senden(envelope.clone()));
            }
            tracing::trace!(absender = %absender, gesendet = bericht.eingereiht, "Broadcast verteilt");
        }
        Zustellung::AnPeer { ziel, envelope } => {
            let sender = registry
                .aktive_empfaenger()
                .into_iter()
                .find(|s| s.peer_id == ziel);
            match sender {
                Some(sender) => bericht.erfassen(&sender, sender.senden(envelope)),
                None => {
                    tracing::debug!(ziel = %ziel, nachricht = %envelope, "Ziel nicht aktiv, Nachricht verworfen");
                }
            }
        }
    }
    bericht
}

/// Trennt Empfaenger mit voller Queue und meldet die Trennungen weiter
fn ueberlastete_trennen(
    registry: &MembershipRegistry,
    ueberlastet: Vec<PeerSender>,
    trennungen: &mpsc::UnboundedSender<Trennung>,
) {
    for sender in ueberlastet {
        if let Some(trennung) = registry.ueberlasteten_trennen(&sender) {
            tracing::warn!(peer = %sender.peer_id, "Langsamer Empfaenger getrennt");
            // Empfaenger fehlt nur beim Herunterfahren
            let _ = trennungen.send(trennung);
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Handle auf den Dispatcher-Task
///
/// Clone teilt dieselbe Queue. Der Task endet, sobald alle Handles
/// verworfen sind.
#[derive(Clone, Debug)]
pub struct Router {
    tx: mpsc::Sender<Zustellung>,
}

impl Router {
    /// Startet den Dispatcher-Task
    ///
    /// Wegen voller Queue getrennte Peers landen in `trennungen`, damit der
    /// Aufrufer Folgearbeiten wie eine Hub-Neuanforderung erledigen kann.
    pub fn starten(
        registry: Arc<MembershipRegistry>,
        trennungen: mpsc::UnboundedSender<Trennung>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Zustellung>(ZUSTELL_QUEUE_GROESSE);
        let task = tokio::spawn(async move {
            while let Some(zustellung) = rx.recv().await {
                let bericht = zustellen(&registry, zustellung);
                if !bericht.ueberlastet.is_empty() {
                    ueberlastete_trennen(&registry, bericht.ueberlastet, &trennungen);
                }
            }
            tracing::debug!("Dispatcher beendet");
        });
        (Self { tx }, task)
    }

    /// Chat-Text an alle anderen aktiven Peers
    pub async fn broadcast(&self, absender: PeerId, envelope: Envelope) -> RelayResult<()> {
        self.einreihen(Zustellung::Broadcast { absender, envelope }).await
    }

    /// Relay-Nachricht an einen Peer
    pub async fn an_peer(&self, ziel: PeerId, envelope: Envelope) -> RelayResult<()> {
        self.einreihen(Zustellung::AnPeer { ziel, envelope }).await
    }

    async fn einreihen(&self, zustellung: Zustellung) -> RelayResult<()> {
        self.tx
            .send(zustellung)
            .await
            .map_err(|_| RelayError::DispatcherBeendet)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use keyhub_protocol::Command;
    use std::time::Duration;

    /// Nimmt einen Peer als ersten Hub bzw. per Handshake in den Raum auf
    fn aktiver_peer(registry: &MembershipRegistry) -> (PeerId, mpsc::Receiver<Envelope>) {
        let id = PeerId::new();
        let aufnahme = registry.pending_aufnehmen(id);
        if registry.key_hub() != Some(id) {
            registry.handshake_abgeschlossen(&id, aufnahme.sitzung).unwrap();
        }
        let (tx, rx) = mpsc::channel(AUSGANGS_QUEUE_GROESSE);
        registry.aktivieren(&id, PeerSender::neu(id, tx)).unwrap();
        (id, rx)
    }

    fn zustellen_anzahl(registry: &MembershipRegistry, zustellung: Zustellung) -> usize {
        let bericht = zustellen(registry, zustellung);
        assert!(bericht.ueberlastet.is_empty());
        bericht.eingereiht
    }

    #[test]
    fn broadcast_ohne_echo_an_absender() {
        let registry = MembershipRegistry::neu();
        let (a, mut rx_a) = aktiver_peer(&registry);
        let (_b, mut rx_b) = aktiver_peer(&registry);
        let (_c, mut rx_c) = aktiver_peer(&registry);

        let gesendet = zustellen_anzahl(
            &registry,
            Zustellung::Broadcast {
                absender: a,
                envelope: Envelope::text("alice", "00aa"),
            },
        );
        assert_eq!(gesendet, 2);
        assert!(rx_a.try_recv().is_err(), "Absender darf kein Echo erhalten");
        assert_eq!(rx_b.try_recv().unwrap().message, "00aa");
        assert_eq!(rx_c.try_recv().unwrap().message, "00aa");
    }

    #[test]
    fn wartende_peers_erhalten_keinen_broadcast() {
        let registry = MembershipRegistry::neu();
        let (a, _rx_a) = aktiver_peer(&registry);
        let (_b, mut rx_b) = aktiver_peer(&registry);
        // Dritter Peer steckt noch im Handshake
        registry.pending_aufnehmen(PeerId::new());

        let gesendet = zustellen_anzahl(
            &registry,
            Zustellung::Broadcast {
                absender: a,
                envelope: Envelope::text("alice", "ff"),
            },
        );
        assert_eq!(gesendet, 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn geschlossene_queue_blockiert_andere_nicht() {
        let registry = MembershipRegistry::neu();
        let (a, _rx_a) = aktiver_peer(&registry);
        let (_b, rx_b) = aktiver_peer(&registry);
        let (_c, mut rx_c) = aktiver_peer(&registry);
        drop(rx_b);

        let gesendet = zustellen_anzahl(
            &registry,
            Zustellung::Broadcast {
                absender: a,
                envelope: Envelope::text("alice", "01"),
            },
        );
        assert_eq!(gesendet, 1);
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn an_peer_nur_an_ziel() {
        let registry = MembershipRegistry::neu();
        let (hub, mut rx_hub) = aktiver_peer(&registry);
        let (_b, mut rx_b) = aktiver_peer(&registry);

        let gesendet = zustellen_anzahl(
            &registry,
            Zustellung::AnPeer {
                ziel: hub,
                envelope: Envelope::command(Command::ExchangeKeys),
            },
        );
        assert_eq!(gesendet, 1);
        assert!(rx_hub.try_recv().unwrap().ist_befehl(Command::ExchangeKeys));
        assert!(rx_b.try_recv().is_err());

        let unbekannt = zustellen_anzahl(
            &registry,
            Zustellung::AnPeer {
                ziel: PeerId::new(),
                envelope: Envelope::command(Command::ExchangeKeys),
            },
        );
        assert_eq!(unbekannt, 0);
    }

    #[tokio::test]
    async fn reihenfolge_eines_absenders_bleibt_erhalten() {
        let registry = Arc::new(MembershipRegistry::neu());
        let (a, _rx_a) = aktiver_peer(&registry);
        let (_b, mut rx_b) = aktiver_peer(&registry);
        let (trennungen_tx, _trennungen_rx) = mpsc::unbounded_channel();
        let (router, _task) = Router::starten(Arc::clone(&registry), trennungen_tx);

        for i in 0..50 {
            router
                .broadcast(a, Envelope::text("alice", format!("{i:02x}")))
                .await
                .unwrap();
        }
        for i in 0..50 {
            let env = rx_b.recv().await.unwrap();
            assert_eq!(env.message, format!("{i:02x}"));
        }
    }

    #[test]
    fn volle_queue_meldet_ueberlasteten_empfaenger() {
        let registry = MembershipRegistry::neu();
        let (a, _rx_a) = aktiver_peer(&registry);
        let langsam = PeerId::new();
        let aufnahme = registry.pending_aufnehmen(langsam);
        registry
            .handshake_abgeschlossen(&langsam, aufnahme.sitzung)
            .unwrap();
        let (tx, _rx_langsam) = mpsc::channel(1);
        registry
            .aktivieren(&langsam, PeerSender::neu(langsam, tx))
            .unwrap();

        let broadcast = |text: &str| Zustellung::Broadcast {
            absender: a,
            envelope: Envelope::text("alice", text),
        };
        assert_eq!(zustellen(&registry, broadcast("01")).eingereiht, 1);
        let bericht = zustellen(&registry, broadcast("02"));
        assert_eq!(bericht.eingereiht, 0);
        assert_eq!(bericht.ueberlastet.len(), 1);
        assert_eq!(bericht.ueberlastet[0].peer_id, langsam);
    }

    #[tokio::test]
    async fn dispatcher_trennt_empfaenger_mit_voller_queue() {
        let registry = Arc::new(MembershipRegistry::neu());
        let (hub, _rx_hub) = aktiver_peer(&registry);
        let langsam = PeerId::new();
        let aufnahme = registry.pending_aufnehmen(langsam);
        registry
            .handshake_abgeschlossen(&langsam, aufnahme.sitzung)
            .unwrap();
        // Queue mit Platz fuer genau ein Envelope, niemand liest
        let (tx, _rx_langsam) = mpsc::channel(1);
        registry
            .aktivieren(&langsam, PeerSender::neu(langsam, tx))
            .unwrap();

        let (trennungen_tx, mut trennungen_rx) = mpsc::unbounded_channel();
        let (router, _task) = Router::starten(Arc::clone(&registry), trennungen_tx);
        for i in 0..3 {
            router
                .broadcast(hub, Envelope::text("alice", format!("{i:02x}")))
                .await
                .unwrap();
        }

        let trennung = tokio::time::timeout(Duration::from_secs(2), trennungen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trennung.peer.id, langsam);
        assert!(!trennung.war_hub);
        assert!(registry.peer(&langsam).is_none());
        assert!(registry.peer(&hub).is_some());
    }

    #[test]
    fn ueberlastung_trifft_keinen_reconnect() {
        let registry = MembershipRegistry::neu();
        let (a, _rx_a) = aktiver_peer(&registry);
        let alt = registry
            .aktive_empfaenger()
            .into_iter()
            .find(|s| s.peer_id == a)
            .unwrap();

        // Gleiche Session-ID verbindet sich neu und bekommt eine frische Queue
        let aufnahme = registry.pending_aufnehmen(a);
        assert_eq!(aufnahme.route, crate::registry::Route::KeyHub);
        let (tx, _rx_neu) = mpsc::channel(AUSGANGS_QUEUE_GROESSE);
        registry.aktivieren(&a, PeerSender::neu(a, tx)).unwrap();

        assert!(registry.ueberlasteten_trennen(&alt).is_none());
        assert!(registry.peer(&a).unwrap().ist_aktiv());
    }
}
