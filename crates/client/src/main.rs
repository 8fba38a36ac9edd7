//! keyhub-chat – zeilenbasierter Chat-Client
//!
//! Jede Eingabezeile wird verschluesselt an den Raum gesendet, empfangene
//! Nachrichten erscheinen als `absender: text`. Ende der Eingabe oder
//! Ctrl-C beendet den Client mit Exit-Code 0.

use anyhow::{Context, Result};
use clap::Parser;
use keyhub_client::{ChatClient, ChatEreignis, ClientError, RelayAdresse};
use keyhub_observability::logging_initialisieren;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

#[derive(Debug, Parser)]
#[command(name = "keyhub-chat", version, about = "Ende-zu-Ende-verschluesselter Gruppenchat")]
struct Args {
    /// Host des Relays
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port des Relays
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Anzeigename im Raum; ohne Angabe wird er von stdin gelesen
    #[arg(long)]
    username: Option<String>,
}

/// Liefert den Anzeigenamen: Argument oder erste nicht-leere Eingabezeile
async fn username_bestimmen<R>(angegeben: Option<String>, zeilen: &mut Lines<R>) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    if let Some(name) = angegeben.filter(|n| !n.trim().is_empty()) {
        return Ok(name.trim().to_string());
    }
    eprint!("Benutzername: ");
    while let Some(zeile) = zeilen.next_line().await? {
        let name = zeile.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }
    anyhow::bail!("Kein Benutzername angegeben (--username oder erste Eingabezeile)")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // Warnungen gehen nach stderr, stdout bleibt dem Chat
    logging_initialisieren("warn", "text");

    let mut zeilen = BufReader::new(tokio::io::stdin()).lines();
    let username = username_bestimmen(args.username, &mut zeilen).await?;

    let adresse = RelayAdresse::neu(args.host, args.port);
    let mut client = ChatClient::verbinden(adresse.clone(), username)
        .await
        .with_context(|| format!("Beitritt ueber {} fehlgeschlagen", adresse.url("")))?;

    loop {
        tokio::select! {
            zeile = zeilen.next_line() => {
                match zeile? {
                    Some(zeile) if zeile.trim().is_empty() => continue,
                    Some(zeile) => match client.senden(&zeile).await {
                        Ok(()) => {}
                        Err(ClientError::KeinRaumSchluessel) => {
                            eprintln!("Noch kein Raum-Schluessel, Nachricht nicht gesendet");
                        }
                        Err(e) => return Err(e.into()),
                    },
                    None => break,
                }
            }

            ereignis = client.naechstes_ereignis() => {
                match ereignis {
                    Some(ChatEreignis::Nachricht { absender, text }) => println!("{absender}: {text}"),
                    Some(ChatEreignis::Getrennt) | None => {
                        eprintln!("Verbindung zum Relay getrennt");
                        return Ok(());
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.schliessen().await;
    Ok(())
}
