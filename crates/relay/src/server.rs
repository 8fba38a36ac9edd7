//! Relay-Server – bindet die Endpunkte an einen Listener
//!
//! Laeuft bis der Shutdown-Kanal `true` meldet. Offene Chat-Verbindungen
//! beobachten denselben Kanal und trennen sich selbst.

use axum::routing::get;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::error::RelayResult;
use crate::handlers;
use crate::state::{RelayConfig, RelayState};

/// Router mit den drei WebSocket-Endpunkten
pub fn app(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/connect", get(handlers::connect_handler))
        .route("/key-exchange", get(handlers::key_exchange_handler))
        .route("/ws", get(handlers::ws_handler))
        .with_state(state)
}

/// WebSocket-Relay
pub struct RelayServer {
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Erstellt den Server samt Dispatcher-Task
    pub fn neu(config: RelayConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            state: RelayState::neu(config, shutdown_rx),
        }
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Bedient Verbindungen auf `listener` bis zum Shutdown-Signal
    pub async fn starten(self, listener: TcpListener) -> RelayResult<()> {
        let adresse = listener.local_addr()?;
        tracing::info!(adresse = %adresse, "Relay gestartet");

        let mut shutdown_rx = self.state.shutdown.clone();
        axum::serve(listener, app(self.state))
            .with_graceful_shutdown(async move {
                while shutdown_rx.changed().await.is_ok() {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                tracing::info!("Relay: Shutdown-Signal empfangen");
            })
            .await?;

        tracing::info!("Relay gestoppt");
        Ok(())
    }
}
