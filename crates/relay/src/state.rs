//! Gemeinsamer Relay-Zustand
//!
//! Ein expliziter Kontext statt globaler Variablen: Registry, Dispatcher und
//! Handshake-Koordinator werden hier gebuendelt und per `Arc` an jeden
//! Verbindungs-Task gereicht.

use keyhub_core::PeerId;
use keyhub_protocol::{Command, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::handshake::HandshakeCoordinator;
use crate::registry::{MembershipRegistry, Trennung};
use crate::router::Router;
use crate::transport::WsKanal;

/// Zeitgrenzen des Relays
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Zeitlimit pro blockierendem Handshake-Schritt
    pub schritt_timeout: Duration,
    /// Frist zwischen Ende der Join-Verbindung und Oeffnen der Chat-Verbindung
    pub beitritts_fenster: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            schritt_timeout: Duration::from_secs(30),
            beitritts_fenster: Duration::from_secs(30),
        }
    }
}

/// Geteilter Zustand aller Verbindungs-Tasks
///
/// `C` ist der Kanal-Typ der Handshake-Verbindungen des Key-Hubs.
pub struct RelayState<C = WsKanal> {
    pub config: RelayConfig,
    pub registry: Arc<MembershipRegistry>,
    pub router: Router,
    pub handshakes: HandshakeCoordinator<C>,
    /// `true` sobald der Server herunterfaehrt
    pub shutdown: watch::Receiver<bool>,
}

impl<C: Send + 'static> RelayState<C> {
    /// Erstellt den Zustand und startet den Dispatcher-Task
    ///
    /// Trennungen des Dispatchers (volle Ausgangs-Queue) verarbeitet ein
    /// eigener Task, der den Zustand nur schwach referenziert.
    pub fn neu(config: RelayConfig, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        let registry = Arc::new(MembershipRegistry::neu());
        let (trennungen_tx, mut trennungen_rx) = mpsc::unbounded_channel::<Trennung>();
        let (router, _dispatcher) = Router::starten(Arc::clone(&registry), trennungen_tx);
        let state = Arc::new(Self {
            config,
            registry,
            router,
            handshakes: HandshakeCoordinator::neu(),
            shutdown,
        });

        let schwach = Arc::downgrade(&state);
        tokio::spawn(async move {
            while let Some(trennung) = trennungen_rx.recv().await {
                let Some(state) = schwach.upgrade() else {
                    break;
                };
                state.trennung_verarbeiten(&trennung).await;
            }
        });
        state
    }

    /// Entfernt einen Peer und stoesst bei Hub-Wechsel die Folgeschritte an
    pub async fn peer_trennen(&self, peer_id: &PeerId, sitzung: u64) -> Option<Trennung> {
        let trennung = self.registry.trennen(peer_id, sitzung)?;
        tracing::info!(
            peer = %peer_id,
            war_hub = trennung.war_hub,
            "Peer getrennt"
        );
        self.trennung_verarbeiten(&trennung).await;
        Some(trennung)
    }

    /// Fordert beim neuen Hub Handshakes fuer alle noch Wartenden an
    pub async fn trennung_verarbeiten(&self, trennung: &Trennung) {
        if trennung.neuer_hub.is_some() {
            self.ausstehende_handshakes_anfordern().await;
        }
    }

    /// Sendet dem aktiven Hub ein `exchange-keys` pro Wartendem, der bei
    /// dieser Hub-Sitzung noch nicht angefordert wurde
    ///
    /// Ein nur reservierter Hub wird nicht angefragt; seine Aktivierung ruft
    /// diese Methode erneut auf. Handshakes die bereits laufen, sind an ihren
    /// alten Hub gebunden; deren Beitretende muessen neu beitreten.
    pub async fn ausstehende_handshakes_anfordern(&self) {
        let Some(hub) = self.registry.aktiver_hub() else {
            return;
        };
        let anzahl = self.handshakes.anforderungen_vormerken(hub);
        if anzahl == 0 {
            return;
        }
        let (hub_id, _) = hub;
        tracing::info!(hub = %hub_id, anzahl, "Ausstehende Handshakes beim Key-Hub angefordert");
        for _ in 0..anzahl {
            if let Err(e) = self
                .router
                .an_peer(hub_id, Envelope::command(Command::ExchangeKeys))
                .await
            {
                tracing::error!(fehler = %e, "exchange-keys nicht zustellbar");
                return;
            }
        }
    }

    /// Entfernt den Peer, falls er bis Fristende keine Chat-Verbindung oeffnet
    pub fn beitrittsfenster_starten(self: &Arc<Self>, peer_id: PeerId, sitzung: u64) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(state.config.beitritts_fenster).await;
            if let Some(trennung) = state.registry.entfernen_falls_inaktiv(&peer_id, sitzung) {
                tracing::info!(peer = %peer_id, "Beitrittsfenster abgelaufen, Peer entfernt");
                state.trennung_verarbeiten(&trennung).await;
            }
        });
    }
}
