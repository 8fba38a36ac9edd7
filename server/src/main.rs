//! keyhub Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Relay.
//! Ctrl-C beendet den Server mit Exit-Code 0.

use anyhow::Result;
use clap::Parser;
use keyhub_observability::logging_initialisieren;
use keyhub_server::{config::ServerConfig, Server};
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(name = "keyhub-server", version, about = "Relay fuer verschluesselten Gruppenchat")]
struct Args {
    /// Host bzw. Bind-Adresse (ueberschreibt die Konfigurationsdatei)
    #[arg(long)]
    host: Option<String>,

    /// Port (ueberschreibt die Konfigurationsdatei)
    #[arg(long)]
    port: Option<u16>,

    /// Pfad zur TOML-Konfiguration
    #[arg(long, env = "KEYHUB_CONFIG", default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let mut config = ServerConfig::laden(&args.config)?;
    if let Some(host) = args.host {
        config.netzwerk.host = host;
    }
    if let Some(port) = args.port {
        config.netzwerk.port = port;
    }

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config,
        "keyhub Server wird initialisiert"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Ohne Handler laeuft der Server weiter; ein Drop des Senders wuerde ihn beenden
            tracing::error!(fehler = %e, "Signal-Handler nicht installierbar");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
        let _ = shutdown_tx.send(true);
    });

    Server::neu(config).starten(shutdown_rx).await
}
