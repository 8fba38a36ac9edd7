//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Relay ohne Konfigurationsdatei
//! lauffaehig ist.

use keyhub_observability::log_level_gueltig;
use keyhub_relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Zeitgrenzen des Schluessel-Handshakes
    pub handshake: HandshakeEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Host bzw. Bind-Adresse des Relays
    pub host: String,
    /// Port fuer alle WebSocket-Endpunkte
    pub port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
        }
    }
}

/// Zeitgrenzen des Handshakes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeEinstellungen {
    /// Zeitlimit pro blockierendem Schritt in Sekunden
    pub schritt_timeout_sek: u64,
    /// Frist bis zur Chat-Verbindung nach dem Beitritt in Sekunden
    pub beitritts_fenster_sek: u64,
}

impl Default for HandshakeEinstellungen {
    fn default() -> Self {
        Self {
            schritt_timeout_sek: 30,
            beitritts_fenster_sek: 30,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config
                    .validieren()
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Logging ist hier noch nicht initialisiert
                eprintln!("Konfigurationsdatei '{pfad}' nicht gefunden, verwende Standardwerte");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!(
                "ungueltiges [logging].level '{}' (erlaubt: trace, debug, info, warn, error)",
                self.logging.level
            );
        }
        Ok(())
    }

    /// Gibt die Bind-Adresse `host:port` zurueck
    pub fn bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.host, self.netzwerk.port)
    }

    /// Zeitgrenzen fuer den Relay
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            schritt_timeout: Duration::from_secs(self.handshake.schritt_timeout_sek.max(1)),
            beitritts_fenster: Duration::from_secs(self.handshake.beitritts_fenster_sek.max(1)),
        }
    }
}
