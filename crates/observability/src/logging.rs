//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `KEYHUB_LOG_LEVEL`: Filter-Direktive (z.B. `debug`, `keyhub_relay=trace`)
//! - `KEYHUB_LOG_FORMAT`: Format (text/json)
//!
//! Gesetzte Variablen haben Vorrang vor den uebergebenen Werten.

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "KEYHUB_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "KEYHUB_LOG_FORMAT";

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Unbekannte Werte fallen auf `Text` zurueck
    pub fn aus_str(format: &str) -> Self {
        match format.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Waehlt den wirksamen Wert: Umgebung vor Konfiguration, leere Werte zaehlen nicht
pub fn wert_aufloesen(aus_env: Option<String>, konfiguriert: &str) -> String {
    aus_env
        .filter(|wert| !wert.trim().is_empty())
        .unwrap_or_else(|| konfiguriert.to_string())
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Initialisiert das Logging-System.
///
/// Ein bereits gesetzter globaler Subscriber (z.B. in Tests) wird nicht
/// ersetzt; der zweite Aufruf ist dann wirkungslos.
pub fn logging_initialisieren(level: &str, format: &str) {
    let level = wert_aufloesen(std::env::var(ENV_LOG_LEVEL).ok(), level);
    let format = LogFormat::aus_str(&wert_aufloesen(std::env::var(ENV_LOG_FORMAT).ok(), format));

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
    }
}
