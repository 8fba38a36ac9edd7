//! Beitritt ueber `/connect`

use keyhub_core::PeerId;
use keyhub_crypto::RoomKey;
use keyhub_protocol::{Envelope, Info, Nachricht};

use crate::connection::{envelope_empfangen, envelope_senden, schliessen, RelayAdresse, PFAD_CONNECT};
use crate::error::{ClientError, ClientResult};
use crate::key_share::schluessel_empfangen;

/// Ausgang eines Beitritts
#[derive(Debug)]
pub enum Beitritt {
    /// Kein Hub vorhanden, dieser Peer ist jetzt Key-Hub
    KeyHub,
    /// Handshake abgeschlossen, Raum-Schluessel erhalten
    Schluessel(RoomKey),
}

/// Tritt dem Raum bei und fuehrt bei Bedarf den Handshake aus
pub async fn beitreten(adresse: &RelayAdresse, username: &str, peer_id: PeerId) -> ClientResult<Beitritt> {
    let mut ws = adresse.verbinden(PFAD_CONNECT).await?;
    envelope_senden(&mut ws, &Envelope::join(username, peer_id)).await?;

    let antwort = envelope_empfangen(&mut ws).await?;
    let ergebnis = match antwort.klassifizieren()? {
        Nachricht::Info {
            info: Info::KeyHubJoinDone,
            ..
        } => {
            tracing::info!(peer = %peer_id, "Beitritt als Key-Hub");
            Ok(Beitritt::KeyHub)
        }
        Nachricht::Info {
            info: Info::ContinueLogin,
            ..
        } => {
            tracing::debug!(peer = %peer_id, "Handshake mit Key-Hub erforderlich");
            schluessel_empfangen(&mut ws).await.map(Beitritt::Schluessel)
        }
        andere => Err(ClientError::unerwartet(format!(
            "kh-join-done oder cl erwartet, erhalten: {andere:?}"
        ))),
    };
    schliessen(&mut ws).await;
    ergebnis
}
