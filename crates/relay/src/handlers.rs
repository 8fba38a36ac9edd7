//! Endpunkt-Handler
//!
//! - `/connect`: Beitritt, Routing zum Hub oder Handshake
//! - `/key-exchange`: Handshake-Verbindung des Key-Hubs
//! - `/ws`: Chat-Verbindung aktiver Peers

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::StreamExt;
use keyhub_core::PeerId;
use keyhub_protocol::{Command, Envelope, Info, Nachricht};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{RelayError, RelayResult};
use crate::handshake::{self, RawChannel};
use crate::registry::Route;
use crate::router::{PeerSender, AUSGANGS_QUEUE_GROESSE};
use crate::state::RelayState;
use crate::transport::{naechstes_envelope, schreiber, WsKanal};

type SharedState = Arc<RelayState>;

pub async fn connect_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| beitritt_verbindung(state, socket))
}

pub async fn key_exchange_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> Response {
    ws.on_upgrade(move |socket| key_exchange_verbindung(state, socket))
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| chat_verbindung(state, socket))
}

/// Erstes Envelope muss `join` mit gueltiger Session-ID sein
fn join_pruefen(erstes: RelayResult<Option<Envelope>>) -> RelayResult<PeerId> {
    match erstes? {
        Some(envelope) => Ok(envelope.join_id()?),
        None => Err(RelayError::Getrennt),
    }
}

// ---------------------------------------------------------------------------
// /connect
// ---------------------------------------------------------------------------

async fn beitritt_verbindung(state: SharedState, socket: WebSocket) {
    let mut kanal = WsKanal::neu(socket);
    let erstes = tokio::time::timeout(state.config.schritt_timeout, kanal.recv_envelope())
        .await
        .unwrap_or(Err(RelayError::Zeitlimit("join auf /connect")));

    let peer_id = match join_pruefen(erstes) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(fehler = %e, "Ungueltiger Beitritt auf /connect");
            kanal.schliessen().await;
            return;
        }
    };

    let aufnahme = state.registry.pending_aufnehmen(peer_id);
    if let Some(trennung) = &aufnahme.ersetzt {
        state.trennung_verarbeiten(trennung).await;
    }

    match aufnahme.route {
        Route::KeyHub => {
            let antwort = Envelope::server_info(Info::KeyHubJoinDone);
            if let Err(e) = kanal.send_envelope(&antwort).await {
                tracing::warn!(peer = %peer_id, fehler = %e, "kh-join-done nicht zustellbar");
                state.peer_trennen(&peer_id, aufnahme.sitzung).await;
                return;
            }
            tracing::info!(peer = %peer_id, "Beitritt als Key-Hub");
            state.beitrittsfenster_starten(peer_id, aufnahme.sitzung);
        }
        Route::Handshake { hub } => {
            let antwort = Envelope::server_info(Info::ContinueLogin);
            if let Err(e) = kanal.send_envelope(&antwort).await {
                tracing::warn!(peer = %peer_id, fehler = %e, "cl nicht zustellbar");
                state.peer_trennen(&peer_id, aufnahme.sitzung).await;
                return;
            }
            tracing::debug!(peer = %peer_id, hub = %hub, "Beitritt per Handshake");
            if let Err(e) =
                handshake::beitritt_vermitteln(&state, &mut kanal, peer_id, aufnahme.sitzung).await
            {
                tracing::debug!(peer = %peer_id, fehler = %e, "Beitritt ohne Raum-Schluessel beendet");
            }
        }
    }

    kanal.schliessen().await;
}

// ---------------------------------------------------------------------------
// /key-exchange
// ---------------------------------------------------------------------------

async fn key_exchange_verbindung(state: SharedState, socket: WebSocket) {
    match state.handshakes.zuteilen(WsKanal::neu(socket)) {
        Ok(peer_id) => {
            tracing::debug!(peer = %peer_id, "Handshake-Verbindung des Key-Hubs zugeteilt");
        }
        Err(mut kanal) => {
            tracing::warn!("Handshake-Verbindung ohne wartenden Beitretenden, wird geschlossen");
            kanal.schliessen().await;
        }
    }
}

// ---------------------------------------------------------------------------
// /ws
// ---------------------------------------------------------------------------

async fn chat_verbindung(state: SharedState, socket: WebSocket) {
    let (sink, mut stream) = socket.split();

    let erstes = tokio::time::timeout(state.config.schritt_timeout, naechstes_envelope(&mut stream))
        .await
        .unwrap_or(Err(RelayError::Zeitlimit("join auf /ws")));
    let peer_id = match join_pruefen(erstes) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(fehler = %e, "Ungueltiger Beitritt auf /ws");
            return;
        }
    };

    let (tx, rx) = mpsc::channel(AUSGANGS_QUEUE_GROESSE);
    let aktivierung = match state
        .registry
        .aktivieren(&peer_id, PeerSender::neu(peer_id, tx))
    {
        Ok(aktivierung) => aktivierung,
        Err(e) => {
            tracing::warn!(peer = %peer_id, fehler = %e, "Chat-Verbindung abgelehnt");
            return;
        }
    };
    let sitzung = aktivierung.sitzung;

    let schreib_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = schreiber(sink, rx).await {
            tracing::warn!(peer = %peer_id, fehler = %e, "Schreiben fehlgeschlagen, Peer wird getrennt");
            schreib_state.peer_trennen(&peer_id, sitzung).await;
        }
    });

    if aktivierung.ist_hub {
        if let Err(e) = state
            .router
            .an_peer(peer_id, Envelope::command(Command::GenerateKeys))
            .await
        {
            tracing::error!(fehler = %e, "generate-keys nicht zustellbar");
        }
        state.ausstehende_handshakes_anfordern().await;
    }

    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            ergebnis = naechstes_envelope(&mut stream) => {
                match ergebnis {
                    Ok(Some(envelope)) => {
                        if !chat_envelope_verarbeiten(&state, peer_id, envelope).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!(peer = %peer_id, "Chat-Verbindung vom Peer geschlossen");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer_id, fehler = %e, "Lesefehler auf Chat-Verbindung");
                        break;
                    }
                }
            }

            Ok(()) = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(peer = %peer_id, "Shutdown-Signal, Chat-Verbindung wird getrennt");
                    break;
                }
            }
        }
    }

    state.peer_trennen(&peer_id, sitzung).await;
}

/// Verarbeitet ein Envelope eines aktiven Peers; `false` beendet die Verbindung
async fn chat_envelope_verarbeiten(state: &RelayState, peer_id: PeerId, envelope: Envelope) -> bool {
    match envelope.klassifizieren() {
        Ok(Nachricht::Text(_)) => match state.router.broadcast(peer_id, envelope).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(fehler = %e, "Broadcast nicht moeglich");
                false
            }
        },
        Ok(Nachricht::Info {
            info: Info::KeyExchange,
            ..
        }) => {
            tracing::info!(peer = %peer_id, "Peer meldet fehlenden Raum-Schluessel");
            state.registry.handshake_zuruecksetzen(&peer_id);
            true
        }
        Ok(Nachricht::Info {
            info: Info::RoomKey,
            ..
        }) => {
            tracing::debug!(peer = %peer_id, "rk auf Chat-Verbindung wird nicht weitergeleitet");
            true
        }
        Ok(andere) => {
            tracing::warn!(peer = %peer_id, nachricht = ?andere, "Unerwartete Nachricht verworfen");
            true
        }
        Err(e) => {
            tracing::warn!(peer = %peer_id, fehler = %e, "Protokollfehler, Verbindung wird getrennt");
            false
        }
    }
}
