//! Symmetrische Verschluesselung fuer Chat-Texte und Schluessel-Transport
//!
//! AES-256 im CFB-Modus (selbstsynchronisierende Stromchiffre).
//!
//! ## Format
//! ```text
//! hex( [iv(16)] [ciphertext(n)] )
//! ```
//!
//! Der IV wird pro Nachricht frisch gewuerfelt und dem Chiffretext
//! vorangestellt. Die Ausgabe ist kleingeschriebenes Hex und damit
//! transportsicher im JSON-Envelope.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

/// AES-Blockgroesse (= IV-Laenge) in Bytes
pub const BLOCK_GROESSE: usize = 16;

/// Schluessel-Laenge fuer AES-256 in Bytes
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Verschluesselt `plaintext` unter einem 256-Bit-Schluessel
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> CryptoResult<String> {
    schluessel_pruefen(key)?;

    let mut puffer = vec![0u8; BLOCK_GROESSE + plaintext.len()];
    let (iv, daten) = puffer.split_at_mut(BLOCK_GROESSE);
    OsRng.fill_bytes(iv);
    daten.copy_from_slice(plaintext);

    Aes256CfbEnc::new_from_slices(key, iv)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?
        .encrypt(daten);

    Ok(hex::encode(puffer))
}

/// Entschluesselt die hex-kodierte Ausgabe von [`encrypt`]
///
/// Eingaben kuerzer als ein Block schlagen mit
/// [`CryptoError::ChiffretextZuKurz`] fehl.
pub fn decrypt(ciphertext: &str, key: &[u8]) -> CryptoResult<Vec<u8>> {
    schluessel_pruefen(key)?;

    let mut bytes = hex::decode(ciphertext.trim())?;
    if bytes.len() < BLOCK_GROESSE {
        return Err(CryptoError::ChiffretextZuKurz {
            minimum: BLOCK_GROESSE,
            erhalten: bytes.len(),
        });
    }

    let (iv, daten) = bytes.split_at_mut(BLOCK_GROESSE);
    Aes256CfbDec::new_from_slices(key, iv)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?
        .decrypt(daten);

    Ok(bytes.split_off(BLOCK_GROESSE))
}

fn schluessel_pruefen(key: &[u8]) -> CryptoResult<()> {
    if key.len() != SCHLUESSEL_LAENGE {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: SCHLUESSEL_LAENGE,
            erhalten: key.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schluessel() -> [u8; 32] {
        let mut k = [0u8; 32];
        OsRng.fill_bytes(&mut k);
        k
    }

    #[test]
    fn verschluesseln_und_entschluesseln() {
        let key = test_schluessel();
        for klartext in [&b""[..], b"a", b"hallo welt", &[0u8; 1000][..]] {
            let chiffre = encrypt(klartext, &key).unwrap();
            assert_eq!(decrypt(&chiffre, &key).unwrap(), klartext);
        }
    }

    #[test]
    fn ausgabe_ist_kleingeschriebenes_hex_mit_iv() {
        let key = test_schluessel();
        let chiffre = encrypt(b"abc", &key).unwrap();
        assert_eq!(chiffre.len(), 2 * (BLOCK_GROESSE + 3));
        assert!(chiffre
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn frischer_iv_pro_nachricht() {
        let key = test_schluessel();
        let a = encrypt(b"gleicher text", &key).unwrap();
        let b = encrypt(b"gleicher text", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn zu_kurzer_chiffretext_ist_typisierter_fehler() {
        let key = test_schluessel();
        let kurz = hex::encode([0u8; BLOCK_GROESSE - 1]);
        assert!(matches!(
            decrypt(&kurz, &key),
            Err(CryptoError::ChiffretextZuKurz {
                minimum: BLOCK_GROESSE,
                erhalten: 15
            })
        ));
        assert!(matches!(
            decrypt("", &key),
            Err(CryptoError::ChiffretextZuKurz { erhalten: 0, .. })
        ));
    }

    #[test]
    fn nur_iv_ergibt_leeren_klartext() {
        let key = test_schluessel();
        let nur_iv = hex::encode([7u8; BLOCK_GROESSE]);
        assert!(decrypt(&nur_iv, &key).unwrap().is_empty());
    }

    #[test]
    fn kein_hex_ist_fehler() {
        let key = test_schluessel();
        assert!(matches!(decrypt("zz", &key), Err(CryptoError::Hex(_))));
    }

    #[test]
    fn falsche_schluessel_laenge() {
        assert!(matches!(
            encrypt(b"x", &[0u8; 16]),
            Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: 32,
                erhalten: 16
            })
        ));
    }

    #[test]
    fn falscher_schluessel_liefert_anderen_klartext() {
        let chiffre = encrypt(b"geheime nachricht", &test_schluessel()).unwrap();
        let ergebnis = decrypt(&chiffre, &test_schluessel()).unwrap();
        assert_ne!(ergebnis, b"geheime nachricht");
    }
}
