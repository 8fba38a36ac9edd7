//! Handshake-Koordinator – vermittelt den DH-Austausch Beitretender <-> Key-Hub
//!
//! Das Relay sieht nur oeffentliches DH-Material und den verschluesselten
//! Raum-Schluessel. Beide Verbindungen werden strikt nacheinander bedient:
//!
//! ```text
//! 1. Hub -> Relay        P, G, Hub-Public (Binaerframes)
//! 2. Relay -> Beitretender  P, G, Hub-Public
//! 3. Beitretender -> Relay  Beitretender-Public
//! 4. Relay -> Hub        Beitretender-Public
//! 5. Relay -> Hub        Command("share-room-key")
//! 6. Hub -> Relay        Chiffretext des Raum-Schluessels
//! 7. Relay -> Beitretender  Chiffretext
//! ```
//!
//! Jeder Schritt ist durch ein Zeitlimit begrenzt. Bricht ein Schritt ab,
//! wird der Beitretende entfernt und muss neu beitreten. Lag der Fehler beim
//! Hub, wird auch der Hub getrennt und neu gewaehlt.

use keyhub_core::PeerId;
use keyhub_protocol::{Command, Envelope};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::{RelayError, RelayResult};
use crate::state::RelayState;

// ---------------------------------------------------------------------------
// RawChannel
// ---------------------------------------------------------------------------

/// Rohe Handshake-Verbindung (ohne Envelope-Framing fuer DH-Material)
pub trait RawChannel: Send {
    /// Liest den naechsten Binaerframe
    fn recv_binary(&mut self) -> impl Future<Output = RelayResult<Vec<u8>>> + Send;

    /// Schreibt einen Binaerframe
    fn send_binary(&mut self, daten: Vec<u8>) -> impl Future<Output = RelayResult<()>> + Send;

    /// Schreibt ein Envelope als Textframe
    fn send_envelope(&mut self, envelope: &Envelope)
        -> impl Future<Output = RelayResult<()>> + Send;

    /// Schliesst die Verbindung (best effort)
    fn schliessen(&mut self) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Seite einer Handshake-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seite {
    Beitretender,
    Hub,
}

impl Seite {
    fn zeitlimit(self) -> RelayError {
        match self {
            Self::Beitretender => RelayError::Zeitlimit("Handshake-Schritt des Beitretenden"),
            Self::Hub => RelayError::Zeitlimit("Handshake-Schritt des Key-Hubs"),
        }
    }
}

impl std::fmt::Display for Seite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Beitretender => f.write_str("Beitretender"),
            Self::Hub => f.write_str("Key-Hub"),
        }
    }
}

/// Abbruch eines Handshakes mit der verursachenden Seite
#[derive(Debug, Error)]
#[error("Handshake in Schritt {schritt} abgebrochen ({seite}): {ursache}")]
pub struct HandshakeFehler {
    pub seite: Seite,
    pub schritt: u8,
    #[source]
    pub ursache: RelayError,
}

async fn schritt<T>(
    seite: Seite,
    nummer: u8,
    dauer: Duration,
    aktion: impl Future<Output = RelayResult<T>>,
) -> Result<T, HandshakeFehler> {
    let ursache = match tokio::time::timeout(dauer, aktion).await {
        Ok(Ok(wert)) => return Ok(wert),
        Ok(Err(e)) => e,
        Err(_) => seite.zeitlimit(),
    };
    Err(HandshakeFehler {
        seite,
        schritt: nummer,
        ursache,
    })
}

// ---------------------------------------------------------------------------
// Protokoll
// ---------------------------------------------------------------------------

/// Schritte 1 bis 6: liefert den Chiffretext des Hubs
pub async fn schluessel_anfordern<J: RawChannel, H: RawChannel>(
    joiner: &mut J,
    hub: &mut H,
    dauer: Duration,
) -> Result<Vec<u8>, HandshakeFehler> {
    let p = schritt(Seite::Hub, 1, dauer, hub.recv_binary()).await?;
    let g = schritt(Seite::Hub, 1, dauer, hub.recv_binary()).await?;
    let hub_public = schritt(Seite::Hub, 1, dauer, hub.recv_binary()).await?;
    tracing::trace!(p_bytes = p.len(), "DH-Parameter vom Key-Hub erhalten");

    for wert in [p, g, hub_public] {
        schritt(Seite::Beitretender, 2, dauer, joiner.send_binary(wert)).await?;
    }

    let joiner_public = schritt(Seite::Beitretender, 3, dauer, joiner.recv_binary()).await?;
    schritt(Seite::Hub, 4, dauer, hub.send_binary(joiner_public)).await?;

    let anforderung = Envelope::command(Command::ShareRoomKey);
    schritt(Seite::Hub, 5, dauer, hub.send_envelope(&anforderung)).await?;

    schritt(Seite::Hub, 6, dauer, hub.recv_binary()).await
}

/// Schritt 7: Chiffretext an den Beitretenden weiterreichen
pub async fn schluessel_zustellen<J: RawChannel>(
    joiner: &mut J,
    chiffretext: Vec<u8>,
    dauer: Duration,
) -> Result<(), HandshakeFehler> {
    schritt(Seite::Beitretender, 7, dauer, joiner.send_binary(chiffretext)).await
}

/// Kompletter Austausch (Schritte 1 bis 7)
pub async fn negotiate<J: RawChannel, H: RawChannel>(
    joiner: &mut J,
    hub: &mut H,
    dauer: Duration,
) -> Result<(), HandshakeFehler> {
    let chiffretext = schluessel_anfordern(joiner, hub, dauer).await?;
    schluessel_zustellen(joiner, chiffretext, dauer).await
}

// ---------------------------------------------------------------------------
// HandshakeCoordinator
// ---------------------------------------------------------------------------

/// Handshake-Verbindung des Hubs samt dem Hub, bei dem sie angefordert wurde
///
/// `hub` ist `None`, wenn die Herkunft nicht eindeutig ist: der Wartende
/// wurde bei mehreren Hub-Sitzungen angefordert oder bei keiner.
pub struct HubAnbindung<C> {
    pub kanal: C,
    pub hub: Option<(PeerId, u64)>,
}

struct Wartender<C> {
    peer_id: PeerId,
    tx: oneshot::Sender<HubAnbindung<C>>,
    /// Hub-Sitzung, bei der zuletzt `exchange-keys` angefordert wurde
    angefordert: Option<(PeerId, u64)>,
    /// Schon bei einer frueheren Hub-Sitzung angefordert
    mehrdeutig: bool,
}

/// FIFO der Beitretenden, die auf eine Hub-Verbindung warten
///
/// Fuehrt zusaetzlich Buch, bei welcher Hub-Sitzung fuer jeden Wartenden
/// schon angefordert wurde. So erhaelt der Hub pro Wartendem genau ein
/// `exchange-keys`, egal ob Einreihen oder Hub-Aktivierung zuerst kommt.
pub struct HandshakeCoordinator<C> {
    warteschlange: Mutex<VecDeque<Wartender<C>>>,
}

impl<C> Default for HandshakeCoordinator<C> {
    fn default() -> Self {
        Self {
            warteschlange: Mutex::new(VecDeque::new()),
        }
    }
}

impl<C> HandshakeCoordinator<C> {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Reiht einen Beitretenden ein; der Empfaenger liefert die Hub-Verbindung
    pub fn einreihen(&self, peer_id: PeerId) -> oneshot::Receiver<HubAnbindung<C>> {
        let (tx, rx) = oneshot::channel();
        self.warteschlange.lock().push_back(Wartender {
            peer_id,
            tx,
            angefordert: None,
            mehrdeutig: false,
        });
        rx
    }

    /// Vermerkt `hub` bei allen Wartenden, fuer die dort noch nicht angefordert wurde
    ///
    /// Gibt die Anzahl der neu vermerkten Wartenden zurueck; genau so viele
    /// `exchange-keys` muss der Aufrufer an den Hub senden.
    pub fn anforderungen_vormerken(&self, hub: (PeerId, u64)) -> usize {
        let mut neu = 0;
        for wartender in self.warteschlange.lock().iter_mut() {
            if wartender.tx.is_closed() || wartender.angefordert == Some(hub) {
                continue;
            }
            if wartender.angefordert.is_some() {
                wartender.mehrdeutig = true;
            }
            wartender.angefordert = Some(hub);
            neu += 1;
        }
        neu
    }

    /// Uebergibt eine Hub-Verbindung an den aeltesten noch wartenden Peer
    ///
    /// Ohne Wartenden kommt die Verbindung unveraendert zurueck.
    pub fn zuteilen(&self, mut kanal: C) -> Result<PeerId, C> {
        let mut warteschlange = self.warteschlange.lock();
        while let Some(wartender) = warteschlange.pop_front() {
            let hub = if wartender.mehrdeutig {
                None
            } else {
                wartender.angefordert
            };
            match wartender.tx.send(HubAnbindung { kanal, hub }) {
                Ok(()) => return Ok(wartender.peer_id),
                Err(zurueck) => {
                    tracing::debug!(peer = %wartender.peer_id, "Wartender bereits abgebrochen");
                    kanal = zurueck.kanal;
                }
            }
        }
        Err(kanal)
    }

    pub fn entfernen(&self, peer_id: &PeerId) {
        self.warteschlange
            .lock()
            .retain(|w| &w.peer_id != peer_id);
    }

    /// Noch wartende Peers in Ankunftsreihenfolge
    pub fn wartende(&self) -> Vec<PeerId> {
        self.warteschlange
            .lock()
            .iter()
            .filter(|w| !w.tx.is_closed())
            .map(|w| w.peer_id)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Beitritt vermitteln
// ---------------------------------------------------------------------------

/// Fuehrt den Handshake fuer einen Beitretenden auf seiner Join-Verbindung aus
///
/// Wartet auf die Handshake-Verbindung des Hubs, vermittelt den Austausch
/// und aktualisiert die Registry je nach Ausgang.
pub async fn beitritt_vermitteln<C, J>(
    state: &Arc<RelayState<C>>,
    joiner: &mut J,
    peer_id: PeerId,
    sitzung: u64,
) -> RelayResult<()>
where
    C: RawChannel + 'static,
    J: RawChannel,
{
    let dauer = state.config.schritt_timeout;
    let zuteilung = state.handshakes.einreihen(peer_id);

    // Erst nach dem Einreihen pruefen: ein Hub, der inzwischen aktiv wurde,
    // hat die Warteschlange dann entweder schon gesehen oder wird hier angefragt
    state.ausstehende_handshakes_anfordern().await;

    let anbindung = match tokio::time::timeout(dauer, zuteilung).await {
        Ok(Ok(anbindung)) => anbindung,
        Ok(Err(_)) | Err(_) => {
            state.handshakes.entfernen(&peer_id);
            state.peer_trennen(&peer_id, sitzung).await;
            tracing::warn!(peer = %peer_id, "Keine Handshake-Verbindung vom Key-Hub erhalten");
            return Err(RelayError::Zeitlimit("Handshake-Verbindung des Key-Hubs"));
        }
    };

    let HubAnbindung {
        kanal: mut hub_kanal,
        hub: hub_sitzung,
    } = anbindung;
    tracing::debug!(peer = %peer_id, "Handshake mit Key-Hub beginnt");

    let ergebnis = match schluessel_anfordern(joiner, &mut hub_kanal, dauer).await {
        Ok(chiffretext) => {
            hub_kanal.schliessen().await;
            // Vor Schritt 7 markieren, damit die Chat-Verbindung sofort zulaessig ist
            state.registry.handshake_abgeschlossen(&peer_id, sitzung)?;
            schluessel_zustellen(joiner, chiffretext, dauer).await
        }
        Err(fehler) => {
            hub_kanal.schliessen().await;
            Err(fehler)
        }
    };

    match ergebnis {
        Ok(()) => {
            tracing::info!(peer = %peer_id, "Raum-Schluessel an Beitretenden uebergeben");
            state.beitrittsfenster_starten(peer_id, sitzung);
            Ok(())
        }
        Err(fehler) => {
            tracing::warn!(peer = %peer_id, fehler = %fehler, "Handshake fehlgeschlagen");
            state.peer_trennen(&peer_id, sitzung).await;
            if fehler.seite == Seite::Hub {
                hub_fehler_ahnden(state, hub_sitzung).await;
            }
            Err(fehler.ursache)
        }
    }
}

/// Trennt den Hub nach einem Fehler auf seiner Seite
///
/// Nur wenn die Verbindung eindeutig bei ihm angefordert wurde und er noch
/// immer Hub ist. Sonst koennte eine verspaetete Verbindung eines frueheren
/// Hubs dem Nachfolger angelastet werden.
async fn hub_fehler_ahnden<C>(state: &Arc<RelayState<C>>, hub: Option<(PeerId, u64)>)
where
    C: Send + 'static,
{
    match hub {
        Some((hub_id, hub_sitzung)) if state.registry.key_hub_sitzung() == hub => {
            state.peer_trennen(&hub_id, hub_sitzung).await;
        }
        Some((hub_id, _)) => {
            tracing::info!(hub = %hub_id, "Fehlerhafter Hub ist nicht mehr Key-Hub, keine Trennung");
        }
        None => {
            tracing::info!("Herkunft der Hub-Verbindung unklar, Key-Hub bleibt");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
