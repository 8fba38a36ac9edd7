//! Integration-Tests: echter Relay auf Loopback, Peers ueber keyhub-client

use keyhub_client::{ChatClient, ChatEreignis, RelayAdresse};
use keyhub_core::PeerId;
use keyhub_relay::{PeerPhase, RelayConfig, RelayServer, RelayState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

const WARTEZEIT: Duration = Duration::from_secs(10);

struct TestRelay {
    adresse: RelayAdresse,
    state: Arc<RelayState>,
    _shutdown: watch::Sender<bool>,
}

async fn relay() -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = RelayConfig {
        schritt_timeout: Duration::from_secs(5),
        beitritts_fenster: Duration::from_secs(5),
    };
    let server = RelayServer::neu(config, shutdown_rx);
    let state = Arc::clone(server.state());
    tokio::spawn(server.starten(listener));
    TestRelay {
        adresse: RelayAdresse::neu("127.0.0.1", port),
        state,
        _shutdown: shutdown_tx,
    }
}

/// Wartet bis die Bedingung auf der Registry gilt
async fn warten_bis(relay: &TestRelay, bedingung: impl Fn(&RelayState) -> bool) {
    tokio::time::timeout(WARTEZEIT, async {
        while !bedingung(&relay.state) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Bedingung nicht rechtzeitig erfuellt");
}

async fn aktiv(relay: &TestRelay, id: PeerId) {
    warten_bis(relay, |state| {
        state
            .registry
            .peer(&id)
            .map_or(false, |peer| peer.phase == PeerPhase::Active)
    })
    .await;
}

async fn nachricht(client: &mut ChatClient) -> (String, String) {
    match tokio::time::timeout(WARTEZEIT, client.naechstes_ereignis())
        .await
        .expect("keine Nachricht empfangen")
    {
        Some(ChatEreignis::Nachricht { absender, text }) => (absender, text),
        andere => panic!("Nachricht erwartet, erhalten: {andere:?}"),
    }
}

#[tokio::test]
async fn erster_peer_wird_key_hub() {
    let relay = relay().await;
    let alice = ChatClient::verbinden(relay.adresse.clone(), "alice").await.unwrap();
    aktiv(&relay, alice.peer_id()).await;

    assert_eq!(relay.state.registry.key_hub(), Some(alice.peer_id()));
    // generate-keys erzeugt den Raum-Schluessel beim Hub
    let slot = Arc::clone(alice.raum_schluessel());
    tokio::time::timeout(WARTEZEIT, async move {
        while !slot.is_set() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn zwei_peers_teilen_raum_schluessel_und_chatten() {
    let relay = relay().await;
    let mut alice = ChatClient::verbinden(relay.adresse.clone(), "alice").await.unwrap();
    aktiv(&relay, alice.peer_id()).await;

    let mut bob = ChatClient::verbinden(relay.adresse.clone(), "bob").await.unwrap();
    aktiv(&relay, bob.peer_id()).await;

    let schluessel_alice = alice.raum_schluessel().get().unwrap();
    let schluessel_bob = bob.raum_schluessel().get().unwrap();
    assert_eq!(schluessel_alice, schluessel_bob);
    assert_eq!(relay.state.registry.key_hub(), Some(alice.peer_id()));

    bob.senden("hello").await.unwrap();
    assert_eq!(nachricht(&mut alice).await, ("bob".to_string(), "hello".to_string()));

    alice.senden("hallo bob").await.unwrap();
    assert_eq!(nachricht(&mut bob).await, ("alice".to_string(), "hallo bob".to_string()));
}

#[tokio::test]
async fn hub_ausfall_waehlt_nachfolger_und_beitritt_geht_weiter() {
    let relay = relay().await;
    let alice = ChatClient::verbinden(relay.adresse.clone(), "alice").await.unwrap();
    aktiv(&relay, alice.peer_id()).await;
    let mut bob = ChatClient::verbinden(relay.adresse.clone(), "bob").await.unwrap();
    aktiv(&relay, bob.peer_id()).await;
    let bob_id = bob.peer_id();

    alice.schliessen().await;
    warten_bis(&relay, |state| state.registry.key_hub() == Some(bob_id)).await;

    // Der neue Hub verteilt denselben Raum-Schluessel
    let carol = ChatClient::verbinden(relay.adresse.clone(), "carol").await.unwrap();
    aktiv(&relay, carol.peer_id()).await;
    assert_eq!(
        carol.raum_schluessel().get().unwrap(),
        bob.raum_schluessel().get().unwrap()
    );

    carol.senden("neu hier").await.unwrap();
    assert_eq!(nachricht(&mut bob).await, ("carol".to_string(), "neu hier".to_string()));
    assert_eq!(relay.state.registry.anzahl(), 2);
}
