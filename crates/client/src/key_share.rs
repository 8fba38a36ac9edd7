//! Schluessel-Handshake, beide Haelften
//!
//! - Key-Hub: frische Primzahl, eigener Exponent, Raum-Schluessel unter dem
//!   paarweisen Geheimnis verschluesseln
//! - Beitretender: Parameter empfangen, eigenen Exponenten senden,
//!   Raum-Schluessel entschluesseln
//!
//! Das Relay reicht die Frames nur durch.

use futures_util::{Sink, Stream};
use keyhub_crypto::{DhParameter, DhSession, RoomKey};
use keyhub_protocol::Command;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::connection::{
    binaer_empfangen, binaer_senden, envelope_empfangen, schliessen, RelayAdresse,
    PFAD_KEY_EXCHANGE,
};
use crate::error::{ClientError, ClientResult};

/// Hub-Haelfte auf einer neuen `/key-exchange`-Verbindung
pub async fn schluessel_teilen(adresse: &RelayAdresse, raum_schluessel: &RoomKey) -> ClientResult<()> {
    let mut ws = adresse.verbinden(PFAD_KEY_EXCHANGE).await?;
    let ergebnis = hub_handshake(&mut ws, raum_schluessel).await;
    schliessen(&mut ws).await;
    ergebnis
}

/// Hub-Haelfte ueber einer bereits offenen Verbindung
pub async fn hub_handshake<S>(ws: &mut S, raum_schluessel: &RoomKey) -> ClientResult<()>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    // Primzahl pro Handshake neu
    let parameter = DhParameter::generate()?;
    let mut session = DhSession::new(parameter.clone())?;

    binaer_senden(ws, parameter.p_bytes()).await?;
    binaer_senden(ws, parameter.g_bytes()).await?;
    binaer_senden(ws, session.public_key_bytes()).await?;

    let joiner_public = binaer_empfangen(ws).await?;

    let anforderung = envelope_empfangen(ws).await?;
    if !anforderung.ist_befehl(Command::ShareRoomKey) {
        return Err(ClientError::unerwartet(format!(
            "share-room-key erwartet, erhalten: {anforderung}"
        )));
    }

    let psk = session.compute_shared_secret(&joiner_public)?;
    let verpackt = raum_schluessel.wrap(&psk)?;
    binaer_senden(ws, verpackt.into_bytes()).await?;
    tracing::info!("Raum-Schluessel an Beitretenden gesendet");
    Ok(())
}

/// Beitretenden-Haelfte auf der Join-Verbindung nach `cl`
pub async fn schluessel_empfangen<S>(ws: &mut S) -> ClientResult<RoomKey>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let p = binaer_empfangen(ws).await?;
    let g = binaer_empfangen(ws).await?;
    let hub_public = binaer_empfangen(ws).await?;

    let mut session = DhSession::new(DhParameter::aus_bytes(&p, &g)?)?;
    binaer_senden(ws, session.public_key_bytes()).await?;

    let chiffretext = binaer_empfangen(ws).await?;
    let chiffretext = String::from_utf8(chiffretext)
        .map_err(|_| ClientError::unerwartet("Chiffretext ist kein Hex-Text"))?;

    let psk = session.compute_shared_secret(&hub_public)?;
    let raum_schluessel = RoomKey::unwrap(&chiffretext, &psk)?;
    tracing::info!("Raum-Schluessel vom Key-Hub erhalten");
    Ok(raum_schluessel)
}
