//! # keyhub-crypto
//!
//! Kryptografie fuer keyhub. Das Relay sieht nie einen Schluessel im Klartext.
//!
//! ## Module
//! - `cipher` - AES-256-CFB mit zufaelligem IV, hex-kodierte Ausgabe
//! - `dh` - Diffie-Hellman ueber einer frischen 256-Bit-Primzahl
//! - `room_key` - Raum-Schluessel (32 Bytes) und sein Transport unter dem PSK
//! - `types` - Gemeinsame Typen (SecretBytes)
//! - `error` - Fehlertypen

pub mod cipher;
pub mod dh;
pub mod error;
pub mod room_key;
pub mod types;

// Bequeme Re-Exports
pub use cipher::{decrypt, encrypt, BLOCK_GROESSE, SCHLUESSEL_LAENGE};
pub use dh::{generate_prime, DhParameter, DhSession, SharedSecret, GENERATOR, PRIME_BITS};
pub use error::{CryptoError, CryptoResult};
pub use room_key::{RoomKey, RoomKeySlot};
pub use types::SecretBytes;
