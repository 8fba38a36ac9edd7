//! Membership-Registry – wer ist verbunden, wer tritt bei, wer ist Key-Hub
//!
//! Alle Mutationen laufen ueber einen einzigen Mutex. Broadcast-Lesezugriffe
//! erhalten einen Snapshot und halten den Lock nie waehrend des Sendens.
//!
//! ## Hub-Wahl
//! Faellt der Key-Hub weg, wird der am laengsten aktive verbleibende Peer
//! (kleinste Aktivierungsnummer) neuer Hub. Ohne aktive Peers bleibt der
//! Hub leer und der naechste Beitretende reserviert ihn.

use keyhub_core::PeerId;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{RelayError, RelayResult};
use crate::router::PeerSender;
use crate::session::{PeerPhase, PeerSession};

// ---------------------------------------------------------------------------
// Ergebnis-Typen
// ---------------------------------------------------------------------------

/// Weg eines neu aufgenommenen Peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Kein Hub vorhanden: der Peer ist reservierter Key-Hub
    KeyHub,
    /// DH-Handshake mit dem aktuellen Hub noetig
    Handshake { hub: PeerId },
}

/// Ergebnis von [`MembershipRegistry::pending_aufnehmen`]
#[derive(Debug)]
pub struct Aufnahme {
    pub sitzung: u64,
    pub route: Route,
    /// Ersetzter Datensatz bei erneutem Beitritt mit derselben Session-ID
    pub ersetzt: Option<Trennung>,
}

/// Ergebnis von [`MembershipRegistry::aktivieren`]
#[derive(Debug, Clone, Copy)]
pub struct Aktivierung {
    pub sitzung: u64,
    pub ist_hub: bool,
}

/// Ergebnis einer Entfernung
#[derive(Debug)]
pub struct Trennung {
    /// Letzter Stand des entfernten Peers (Phase `Disconnected`)
    pub peer: PeerSession,
    pub war_hub: bool,
    /// Neu gewaehlter Hub, falls der entfernte Peer Hub war
    pub neuer_hub: Option<PeerId>,
}

// ---------------------------------------------------------------------------
// MembershipRegistry
// ---------------------------------------------------------------------------

/// Autoritative Mitgliedschaftsliste des Relays
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    peers: HashMap<PeerId, PeerSession>,
    /// Reservierter oder aktiver Key-Hub
    key_hub: Option<PeerId>,
    naechste_sitzung: u64,
    naechste_aktivierung: u64,
}

impl RegistryInner {
    fn entfernen(&mut self, id: &PeerId) -> Option<Trennung> {
        let mut peer = self.peers.remove(id)?;
        let war_hub = self.key_hub == Some(*id);
        peer.trennen();

        let neuer_hub = if war_hub {
            self.hub_waehlen(Some(*id))
        } else {
            None
        };
        tracing::debug!(peer = %id, war_hub, "Peer aus Registry entfernt");
        Some(Trennung {
            peer,
            war_hub,
            neuer_hub,
        })
    }

    /// Waehlt den am laengsten aktiven Peer (ohne `ausser`) als Hub
    fn hub_waehlen(&mut self, ausser: Option<PeerId>) -> Option<PeerId> {
        if let Some(alt) = self.key_hub.take() {
            if let Some(peer) = self.peers.get_mut(&alt) {
                peer.is_key_hub = false;
            }
        }

        let gewaehlt = self
            .peers
            .values()
            .filter(|p| p.ist_aktiv() && Some(p.id) != ausser)
            .min_by_key(|p| p.aktiv_seit)
            .map(|p| p.id);

        if let Some(id) = gewaehlt {
            if let Some(peer) = self.peers.get_mut(&id) {
                peer.is_key_hub = true;
            }
            self.key_hub = Some(id);
            tracing::info!(hub = %id, "Neuer Key-Hub gewaehlt");
        } else {
            tracing::info!("Kein aktiver Peer verbleibt, Key-Hub ist leer");
        }
        gewaehlt
    }
}

impl MembershipRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Nimmt einen Peer beim Oeffnen seiner Join-Verbindung auf
    ///
    /// Eine bereits bekannte Session-ID gilt als Reconnect: der alte
    /// Datensatz wird verworfen und durch einen frischen ersetzt.
    pub fn pending_aufnehmen(&self, id: PeerId) -> Aufnahme {
        let mut inner = self.inner.lock();

        let ersetzt = inner.entfernen(&id);
        if ersetzt.is_some() {
            tracing::info!(peer = %id, "Erneuter Beitritt, alter Datensatz ersetzt");
        }

        inner.naechste_sitzung += 1;
        let sitzung = inner.naechste_sitzung;
        let mut peer = PeerSession::neu(id, sitzung);

        let route = match inner.key_hub {
            None => {
                peer.als_hub_reservieren();
                inner.key_hub = Some(id);
                tracing::info!(peer = %id, "Kein Key-Hub vorhanden, Peer wird Key-Hub");
                Route::KeyHub
            }
            Some(hub) => {
                peer.handshake_erwarten();
                tracing::debug!(peer = %id, hub = %hub, "Peer wartet auf Handshake");
                Route::Handshake { hub }
            }
        };
        inner.peers.insert(id, peer);

        Aufnahme {
            sitzung,
            route,
            ersetzt,
        }
    }

    /// Markiert den Handshake eines Beitretenden als abgeschlossen
    pub fn handshake_abgeschlossen(&self, id: &PeerId, sitzung: u64) -> RelayResult<()> {
        let mut inner = self.inner.lock();
        match inner.peers.get_mut(id) {
            Some(peer) if peer.sitzung == sitzung => peer.handshake_abschliessen(),
            _ => Err(RelayError::UnbekannterPeer(*id)),
        }
    }

    /// Verschiebt einen Peer ins Broadcast-Set
    ///
    /// Gibt es keinen Key-Hub, wird dieser Peer Hub.
    pub fn aktivieren(&self, id: &PeerId, sender: PeerSender) -> RelayResult<Aktivierung> {
        let mut inner = self.inner.lock();
        let kein_hub = inner.key_hub.is_none();
        inner.naechste_aktivierung += 1;
        let reihenfolge = inner.naechste_aktivierung;

        let peer = inner
            .peers
            .get_mut(id)
            .ok_or(RelayError::UnbekannterPeer(*id))?;
        if !peer.ist_bereit() {
            return Err(RelayError::NichtBereit(*id));
        }
        if kein_hub {
            peer.als_hub_reservieren();
        }
        peer.aktivieren(reihenfolge, sender)?;
        let aktivierung = Aktivierung {
            sitzung: peer.sitzung,
            ist_hub: peer.is_key_hub,
        };
        if kein_hub {
            inner.key_hub = Some(*id);
            tracing::info!(peer = %id, "Peer ohne vorhandenen Hub aktiviert, wird Key-Hub");
        }
        tracing::info!(peer = %id, ist_hub = aktivierung.ist_hub, "Peer aktiv");
        Ok(aktivierung)
    }

    /// Waehlt einen neuen Key-Hub unter den aktiven Peers
    ///
    /// Der bisherige Hub ist von der Wahl ausgeschlossen.
    pub fn neuen_hub_waehlen(&self) -> Option<PeerId> {
        let mut inner = self.inner.lock();
        let bisher = inner.key_hub;
        inner.hub_waehlen(bisher)
    }

    /// Entfernt einen Peer; war er Hub, wird neu gewaehlt
    ///
    /// Nur der Datensatz mit passender `sitzung` wird entfernt, damit eine
    /// alte Verbindung keinen Reconnect verdraengt.
    pub fn trennen(&self, id: &PeerId, sitzung: u64) -> Option<Trennung> {
        let mut inner = self.inner.lock();
        if inner.peers.get(id)?.sitzung != sitzung {
            return None;
        }
        inner.entfernen(id)
    }

    /// Entfernt einen Peer, dessen Ausgangs-Queue voll gelaufen ist
    ///
    /// Greift nur, solange der Datensatz noch genau diese Queue haelt. Ein
    /// zwischenzeitlicher Reconnect bleibt unberuehrt.
    pub fn ueberlasteten_trennen(&self, sender: &PeerSender) -> Option<Trennung> {
        let mut inner = self.inner.lock();
        let peer = inner.peers.get(&sender.peer_id)?;
        if !peer.sender.as_ref().is_some_and(|s| s.gleiche_queue(sender)) {
            return None;
        }
        inner.entfernen(&sender.peer_id)
    }

    /// Entfernt einen Peer, der nach Ablauf des Beitrittsfensters nicht aktiv ist
    pub fn entfernen_falls_inaktiv(&self, id: &PeerId, sitzung: u64) -> Option<Trennung> {
        let mut inner = self.inner.lock();
        let peer = inner.peers.get(id)?;
        if peer.sitzung != sitzung || peer.ist_aktiv() {
            return None;
        }
        inner.entfernen(id)
    }

    /// Peer meldet den Verlust seines Raum-Schluessels
    pub fn handshake_zuruecksetzen(&self, id: &PeerId) {
        if let Some(peer) = self.inner.lock().peers.get_mut(id) {
            peer.handshake_complete = false;
        }
    }

    pub fn key_hub(&self) -> Option<PeerId> {
        self.inner.lock().key_hub
    }

    /// Aktueller Hub mit seiner Sitzungsnummer
    pub fn key_hub_sitzung(&self) -> Option<(PeerId, u64)> {
        let inner = self.inner.lock();
        let hub = inner.key_hub?;
        inner.peers.get(&hub).map(|p| (hub, p.sitzung))
    }

    /// Hub mit Sitzungsnummer, sofern seine Chat-Verbindung offen ist
    pub fn aktiver_hub(&self) -> Option<(PeerId, u64)> {
        let inner = self.inner.lock();
        let hub = inner.key_hub?;
        inner
            .peers
            .get(&hub)
            .filter(|p| p.ist_aktiv())
            .map(|p| (hub, p.sitzung))
    }

    pub fn peer(&self, id: &PeerId) -> Option<PeerSession> {
        self.inner.lock().peers.get(id).cloned()
    }

    /// Snapshot der Ausgangs-Queues aller aktiven Peers
    pub fn aktive_empfaenger(&self) -> Vec<PeerSender> {
        self.inner
            .lock()
            .peers
            .values()
            .filter(|p| p.phase == PeerPhase::Active)
            .filter_map(|p| p.sender.clone())
            .collect()
    }

    /// Snapshot aller Datensaetze
    pub fn snapshot(&self) -> Vec<PeerSession> {
        self.inner.lock().peers.values().cloned().collect()
    }

    pub fn anzahl(&self) -> usize {
        self.inner.lock().peers.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn sender(id: PeerId) -> (PeerSender, mpsc::Receiver<keyhub_protocol::Envelope>) {
        let (tx, rx) = mpsc::channel(8);
        (PeerSender::neu(id, tx), rx)
    }

    fn hub_anzahl(registry: &MembershipRegistry) -> usize {
        registry.snapshot().iter().filter(|p| p.is_key_hub).count()
    }

    /// Peer vollstaendig aufnehmen (Hub oder per Handshake)
    fn beitreten(registry: &MembershipRegistry) -> (PeerId, u64) {
        let id = PeerId::new();
        let aufnahme = registry.pending_aufnehmen(id);
        if aufnahme.route != Route::KeyHub {
            registry.handshake_abgeschlossen(&id, aufnahme.sitzung).unwrap();
        }
        registry.aktivieren(&id, sender(id).0).unwrap();
        (id, aufnahme.sitzung)
    }

    #[test]
    fn erster_peer_reserviert_hub() {
        let registry = MembershipRegistry::neu();
        let a = PeerId::new();
        let aufnahme = registry.pending_aufnehmen(a);
        assert_eq!(aufnahme.route, Route::KeyHub);
        assert_eq!(registry.key_hub(), Some(a));

        // Zweiter Peer kommt vor der Chat-Verbindung des Hubs
        let b = PeerId::new();
        let zweite = registry.pending_aufnehmen(b);
        assert_eq!(zweite.route, Route::Handshake { hub: a });
        assert_eq!(hub_anzahl(&registry), 1);
        assert_eq!(registry.aktiver_hub(), None, "Hub ist nur reserviert");

        let aktivierung = registry.aktivieren(&a, sender(a).0).unwrap();
        assert!(aktivierung.ist_hub);
        assert_eq!(registry.aktiver_hub(), Some((a, aufnahme.sitzung)));
        assert_eq!(
            registry.peer(&b).unwrap().phase,
            PeerPhase::AwaitingHandshake
        );
    }

    #[test]
    fn aktivierung_ohne_handshake_abgelehnt() {
        let registry = MembershipRegistry::neu();
        beitreten(&registry);
        let b = PeerId::new();
        registry.pending_aufnehmen(b);
        assert!(matches!(
            registry.aktivieren(&b, sender(b).0),
            Err(RelayError::NichtBereit(_))
        ));
        assert!(matches!(
            registry.aktivieren(&PeerId::new(), sender(b).0),
            Err(RelayError::UnbekannterPeer(_))
        ));
    }

    #[test]
    fn hub_failover_waehlt_dienstaeltesten() {
        let registry = MembershipRegistry::neu();
        let (a, a_sitzung) = beitreten(&registry);
        let (b, _) = beitreten(&registry);
        let (c, _) = beitreten(&registry);
        assert_eq!(registry.key_hub(), Some(a));

        let trennung = registry.trennen(&a, a_sitzung).unwrap();
        assert!(trennung.war_hub);
        assert_eq!(trennung.neuer_hub, Some(b));
        assert_eq!(trennung.peer.phase, PeerPhase::Disconnected);
        assert_eq!(registry.key_hub(), Some(b));
        assert!(!registry.peer(&c).unwrap().is_key_hub);
        assert_eq!(hub_anzahl(&registry), 1);
    }

    #[test]
    fn failover_mit_drei_peers_hub_in_der_mitte() {
        let registry = MembershipRegistry::neu();
        let (a, a_sitzung) = beitreten(&registry);
        let (b, b_sitzung) = beitreten(&registry);
        let (c, _) = beitreten(&registry);

        // B wird Hub, nachdem A einmal weg und wieder da war
        registry.trennen(&a, a_sitzung);
        assert_eq!(registry.key_hub(), Some(b));
        let (a2, _) = beitreten(&registry);

        let trennung = registry.trennen(&b, b_sitzung).unwrap();
        let neu = trennung.neuer_hub.unwrap();
        assert!(neu == c || neu == a2);
        assert_eq!(neu, c, "C ist laenger aktiv als der wiedergekehrte A");
        assert_eq!(hub_anzahl(&registry), 1);
        assert_eq!(registry.aktive_empfaenger().len(), 2);
    }

    #[test]
    fn letzter_peer_weg_hub_leer() {
        let registry = MembershipRegistry::neu();
        let (a, sitzung) = beitreten(&registry);
        let trennung = registry.trennen(&a, sitzung).unwrap();
        assert!(trennung.neuer_hub.is_none());
        assert_eq!(registry.key_hub(), None);

        // Naechster Beitretender wird wieder Hub
        let b = PeerId::new();
        assert_eq!(registry.pending_aufnehmen(b).route, Route::KeyHub);
    }

    #[test]
    fn wartende_peers_werden_nicht_hub() {
        let registry = MembershipRegistry::neu();
        let (a, sitzung) = beitreten(&registry);
        let b = PeerId::new();
        registry.pending_aufnehmen(b);

        let trennung = registry.trennen(&a, sitzung).unwrap();
        assert!(trennung.neuer_hub.is_none());
        assert!(!registry.peer(&b).unwrap().is_key_hub);
    }

    #[test]
    fn handshake_peer_wird_hub_wenn_keiner_mehr_da() {
        let registry = MembershipRegistry::neu();
        let (a, sitzung) = beitreten(&registry);
        let b = PeerId::new();
        let aufnahme = registry.pending_aufnehmen(b);
        registry.handshake_abgeschlossen(&b, aufnahme.sitzung).unwrap();
        registry.trennen(&a, sitzung);

        let aktivierung = registry.aktivieren(&b, sender(b).0).unwrap();
        assert!(aktivierung.ist_hub);
        assert_eq!(registry.key_hub(), Some(b));
    }

    #[test]
    fn veraltete_sitzung_trennt_nicht() {
        let registry = MembershipRegistry::neu();
        let (a, alt) = beitreten(&registry);
        let neu = registry.pending_aufnehmen(a);
        assert!(neu.ersetzt.is_some());
        assert!(registry.trennen(&a, alt).is_none());
        assert!(registry.peer(&a).is_some());
        assert!(registry.trennen(&a, neu.sitzung).is_some());
    }

    #[test]
    fn reconnect_des_reservierten_hubs_behaelt_reservierung() {
        let registry = MembershipRegistry::neu();
        let a = PeerId::new();
        registry.pending_aufnehmen(a);
        let erneut = registry.pending_aufnehmen(a);
        assert_eq!(erneut.route, Route::KeyHub);
        assert_eq!(registry.key_hub(), Some(a));
        assert_eq!(registry.anzahl(), 1);
    }

    #[test]
    fn reconnect_eines_aktiven_hubs_uebergibt_hub() {
        let registry = MembershipRegistry::neu();
        let (a, _) = beitreten(&registry);
        let (b, _) = beitreten(&registry);

        let erneut = registry.pending_aufnehmen(a);
        assert_eq!(erneut.ersetzt.as_ref().and_then(|t| t.neuer_hub), Some(b));
        assert_eq!(erneut.route, Route::Handshake { hub: b });
    }

    #[test]
    fn beitrittsfenster_entfernt_nur_inaktive() {
        let registry = MembershipRegistry::neu();
        let (a, sitzung_a) = beitreten(&registry);
        assert!(registry.entfernen_falls_inaktiv(&a, sitzung_a).is_none());

        let b = PeerId::new();
        let aufnahme = registry.pending_aufnehmen(b);
        assert!(registry
            .entfernen_falls_inaktiv(&b, aufnahme.sitzung)
            .is_some());
        assert!(registry.peer(&b).is_none());
    }

    #[test]
    fn ke_setzt_handshake_zurueck() {
        let registry = MembershipRegistry::neu();
        let (a, _) = beitreten(&registry);
        registry.handshake_zuruecksetzen(&a);
        assert!(!registry.peer(&a).unwrap().handshake_complete);
    }

    #[test]
    fn explizite_neuwahl_schliesst_bisherigen_hub_aus() {
        let registry = MembershipRegistry::neu();
        let (a, _) = beitreten(&registry);
        let (b, _) = beitreten(&registry);
        assert_eq!(registry.neuen_hub_waehlen(), Some(b));
        assert!(!registry.peer(&a).unwrap().is_key_hub);
        assert_eq!(hub_anzahl(&registry), 1);
    }

    #[test]
    fn hoechstens_ein_hub_bei_gleichzeitigen_beitritten() {
        let registry = Arc::new(MembershipRegistry::neu());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut eigene = Vec::new();
                    for _ in 0..25 {
                        let (id, sitzung) = beitreten(&registry);
                        eigene.push((id, sitzung));
                        assert!(hub_anzahl(&registry) <= 1);
                    }
                    for (id, sitzung) in eigene.into_iter().step_by(2) {
                        registry.trennen(&id, sitzung);
                        assert!(hub_anzahl(&registry) <= 1);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(hub_anzahl(&registry), 1);
        let hub = registry.key_hub().unwrap();
        assert!(registry.peer(&hub).unwrap().ist_aktiv());
    }
}
