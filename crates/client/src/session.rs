//! Chat-Sitzung eines Peers
//!
//! Nach dem Beitritt laeuft die Chat-Verbindung `/ws` mit genau einem
//! Schreiber-Task (Ausgangs-Queue) und einem Leser-Task. Der Leser
//! entschluesselt Texte und bedient die Relay-Befehle des Key-Hubs.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use keyhub_core::PeerId;
use keyhub_crypto::RoomKeySlot;
use keyhub_protocol::{Command, Envelope, Info, Nachricht};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::connection::{envelope_lesen, envelope_senden, RelayAdresse, WsStream, PFAD_WS};
use crate::error::{ClientError, ClientResult};
use crate::join::{beitreten, Beitritt};
use crate::key_share::schluessel_teilen;

/// Groesse der Ausgangs- und Ereignis-Queues
const QUEUE_GROESSE: usize = 256;

const SCHLIESSEN_WARTEZEIT: Duration = Duration::from_secs(1);

/// Was der Leser-Task an die Anwendung meldet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEreignis {
    /// Entschluesselte Nachricht eines anderen Peers
    Nachricht { absender: String, text: String },
    /// Die Chat-Verbindung ist beendet
    Getrennt,
}

/// Beigetretener Peer mit offener Chat-Verbindung
pub struct ChatClient {
    username: String,
    peer_id: PeerId,
    raum_schluessel: Arc<RoomKeySlot>,
    ausgang: mpsc::Sender<Message>,
    ereignisse: mpsc::Receiver<ChatEreignis>,
}

impl ChatClient {
    /// Tritt bei, holt ggf. den Raum-Schluessel und oeffnet die Chat-Verbindung
    pub async fn verbinden(adresse: RelayAdresse, username: impl Into<String>) -> ClientResult<Self> {
        let username = username.into();
        let peer_id = PeerId::new();

        let raum_schluessel = Arc::new(RoomKeySlot::new());
        match beitreten(&adresse, &username, peer_id).await? {
            Beitritt::KeyHub => {}
            Beitritt::Schluessel(schluessel) => raum_schluessel.set(schluessel),
        }

        let mut ws = adresse.verbinden(PFAD_WS).await?;
        envelope_senden(&mut ws, &Envelope::join(username.as_str(), peer_id)).await?;
        let (sink, stream) = ws.split();

        let (ausgang_tx, ausgang_rx) = mpsc::channel(QUEUE_GROESSE);
        let (ereignis_tx, ereignis_rx) = mpsc::channel(QUEUE_GROESSE);

        tokio::spawn(schreiber(sink, ausgang_rx));
        tokio::spawn(
            Leser {
                adresse,
                username: username.clone(),
                raum_schluessel: Arc::clone(&raum_schluessel),
                ausgang: ausgang_tx.clone(),
                ereignisse: ereignis_tx,
                ke_gemeldet: false,
            }
            .laufen(stream),
        );

        tracing::info!(peer = %peer_id, username = %username, "Chat-Verbindung aufgebaut");
        Ok(Self {
            username,
            peer_id,
            raum_schluessel,
            ausgang: ausgang_tx,
            ereignisse: ereignis_rx,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Geteilter Raum-Schluessel-Slot dieses Peers
    pub fn raum_schluessel(&self) -> &Arc<RoomKeySlot> {
        &self.raum_schluessel
    }

    /// Verschluesselt `text` mit dem Raum-Schluessel und reiht es zum Senden ein
    pub async fn senden(&self, text: &str) -> ClientResult<()> {
        let schluessel = self
            .raum_schluessel
            .get()
            .ok_or(ClientError::KeinRaumSchluessel)?;
        let chiffre = schluessel.encrypt_text(text)?;
        let envelope = Envelope::text(self.username.as_str(), chiffre);
        let frame = Message::Text(keyhub_protocol::encode(&envelope)?);
        self.ausgang
            .send(frame)
            .await
            .map_err(|_| ClientError::Getrennt)
    }

    /// Wartet auf das naechste Ereignis; `None` nachdem der Leser beendet ist
    pub async fn naechstes_ereignis(&mut self) -> Option<ChatEreignis> {
        self.ereignisse.recv().await
    }

    /// Sendet einen Close-Frame und wartet kurz auf das Close des Relays
    pub async fn schliessen(mut self) {
        if self.ausgang.send(Message::Close(None)).await.is_err() {
            tracing::debug!(peer = %self.peer_id, "Chat-Verbindung war bereits geschlossen");
            return;
        }
        let warten = async {
            while let Some(ereignis) = self.ereignisse.recv().await {
                if ereignis == ChatEreignis::Getrennt {
                    break;
                }
            }
        };
        if tokio::time::timeout(SCHLIESSEN_WARTEZEIT, warten).await.is_err() {
            tracing::debug!(peer = %self.peer_id, "Relay hat Close nicht bestaetigt");
        }
    }
}

// ---------------------------------------------------------------------------
// Schreiber
// ---------------------------------------------------------------------------

async fn schreiber(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(frame) = rx.recv().await {
        let ist_close = matches!(frame, Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            tracing::warn!(fehler = %e, "Senden an das Relay fehlgeschlagen");
            break;
        }
        if ist_close {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Leser
// ---------------------------------------------------------------------------

struct Leser {
    adresse: RelayAdresse,
    username: String,
    raum_schluessel: Arc<RoomKeySlot>,
    ausgang: mpsc::Sender<Message>,
    ereignisse: mpsc::Sender<ChatEreignis>,
    /// `ke` wird hoechstens einmal gemeldet
    ke_gemeldet: bool,
}

impl Leser {
    async fn laufen(mut self, mut stream: SplitStream<WsStream>) {
        loop {
            match envelope_lesen(&mut stream).await {
                Ok(Some(envelope)) => self.verarbeiten(envelope).await,
                Ok(None) => {
                    tracing::info!("Chat-Verbindung vom Relay geschlossen");
                    break;
                }
                Err(ClientError::Protokoll(e)) => {
                    tracing::warn!(fehler = %e, "Ungueltiges Envelope verworfen");
                }
                Err(e) => {
                    tracing::warn!(fehler = %e, "Lesefehler auf Chat-Verbindung");
                    break;
                }
            }
        }
        let _ = self.ereignisse.send(ChatEreignis::Getrennt).await;
    }

    async fn verarbeiten(&mut self, envelope: Envelope) {
        match envelope.klassifizieren() {
            Ok(Nachricht::Text(chiffre)) => self.text_verarbeiten(envelope.username, &chiffre).await,
            Ok(Nachricht::Command(Command::GenerateKeys)) => {
                let neu = !self.raum_schluessel.is_set();
                self.raum_schluessel.get_or_generate();
                tracing::info!(neu, "Raum-Schluessel bereit (generate-keys)");
            }
            Ok(Nachricht::Command(Command::ExchangeKeys)) => {
                let schluessel = self.raum_schluessel.get_or_generate();
                let adresse = self.adresse.clone();
                tokio::spawn(async move {
                    if let Err(e) = schluessel_teilen(&adresse, &schluessel).await {
                        tracing::warn!(fehler = %e, "Schluessel-Handshake als Key-Hub fehlgeschlagen");
                    }
                });
            }
            Ok(andere) => {
                tracing::debug!(nachricht = ?andere, "Nachricht auf Chat-Verbindung ignoriert");
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Unbekannte Nachricht verworfen");
            }
        }
    }

    async fn text_verarbeiten(&mut self, absender: String, chiffre: &str) {
        let Some(schluessel) = self.raum_schluessel.get() else {
            tracing::warn!(absender = %absender, "Nachricht ohne Raum-Schluessel nicht lesbar");
            self.ke_melden().await;
            return;
        };
        match schluessel.decrypt_text(chiffre) {
            Ok(text) => {
                let _ = self
                    .ereignisse
                    .send(ChatEreignis::Nachricht { absender, text })
                    .await;
            }
            Err(e) => {
                tracing::debug!(absender = %absender, fehler = %e, "Nachricht nicht entschluesselbar, uebersprungen");
            }
        }
    }

    async fn ke_melden(&mut self) {
        if self.ke_gemeldet {
            return;
        }
        self.ke_gemeldet = true;
        let envelope = Envelope::info(self.username.as_str(), Info::KeyExchange, None);
        match keyhub_protocol::encode(&envelope) {
            Ok(text) => {
                let _ = self.ausgang.send(Message::Text(text)).await;
            }
            Err(e) => tracing::warn!(fehler = %e, "ke nicht kodierbar"),
        }
    }
}
