//! keyhub-server – Bibliotheks-Root
//!
//! Verbindet Konfiguration und Relay; `main.rs` kuemmert sich nur noch um
//! Argumente, Logging und Signale.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use keyhub_relay::RelayServer;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Haelt den Server-Zustand bis zum Start zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bindet den Listener und bedient Verbindungen bis `shutdown_rx` `true` meldet
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let adresse = self.config.bind_adresse();
        let listener = TcpListener::bind(&adresse)
            .await
            .with_context(|| format!("Relay kann nicht an '{adresse}' binden"))?;

        tracing::info!(
            adresse = %adresse,
            schritt_timeout_sek = self.config.handshake.schritt_timeout_sek,
            beitritts_fenster_sek = self.config.handshake.beitritts_fenster_sek,
            "Server startet"
        );

        RelayServer::neu(self.config.relay_config(), shutdown_rx)
            .starten(listener)
            .await?;
        Ok(())
    }
}
