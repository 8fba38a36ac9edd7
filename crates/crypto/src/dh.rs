//! Diffie-Hellman ueber einer frischen Primzahl (modulare Exponentiation)
//!
//! Der Key-Hub erzeugt pro Handshake eine neue 256-Bit-Primzahl `P` und
//! nutzt den festen Generator `G = 2`. Beide Seiten berechnen:
//!
//! ```text
//! oeffentlich = G ^ privat mod P
//! geheimnis   = oeffentlich_gegenueber ^ privat mod P
//! ```
//!
//! Empfangene oeffentliche Exponenten werden nicht gegen kleine
//! Untergruppen oder Null geprueft. Das Relay und die Peers vertrauen
//! sich gegenseitig; ein boeswilliger Key-Hub ist kein Teil des Modells.
//!
//! Auf dem Draht werden alle Zahlen als vorzeichenlose Big-Endian-Bytes
//! uebertragen.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::types::SecretBytes;

/// Bitlaenge der Primzahl pro Handshake
pub const PRIME_BITS: u64 = 256;

/// Fester Generator
pub const GENERATOR: u32 = 2;

/// Runden des Miller-Rabin-Tests mit Zufallsbasen
const MILLER_RABIN_RUNDEN: usize = 20;

/// Maximale Versuche beim Ziehen einer Zufallszahl unterhalb einer Schranke
const MAX_ZIEHUNGEN: usize = 256;

/// Kleine Primzahlen fuer Probedivision und feste Zeugen
const KLEINE_PRIMZAHLEN: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

const HKDF_SALT: &[u8] = b"keyhub-psk-v1";
const HKDF_INFO: &[u8] = b"keyhub-room-key-transport";

// ---------------------------------------------------------------------------
// Primzahlen
// ---------------------------------------------------------------------------

/// Erzeugt eine wahrscheinliche Primzahl mit genau `bits` Bits
pub fn generate_prime(bits: u64) -> CryptoResult<BigUint> {
    if bits < 8 {
        return Err(CryptoError::PrimzahlGenerierung(format!(
            "mindestens 8 Bits erforderlich, angefordert: {bits}"
        )));
    }
    let byte_len = bits.div_ceil(8) as usize;
    let ueberschuss = byte_len * 8 - bits as usize;
    let mut roh = vec![0u8; byte_len];

    loop {
        OsRng.fill_bytes(&mut roh);
        roh[0] &= 0xff_u8 >> ueberschuss;
        // Oberstes Bit setzen (volle Bitlaenge), unterstes Bit setzen (ungerade)
        roh[0] |= 0x80_u8 >> ueberschuss;
        roh[byte_len - 1] |= 1;

        let kandidat = BigUint::from_bytes_be(&roh);
        if ist_wahrscheinlich_prim(&kandidat, MILLER_RABIN_RUNDEN) {
            tracing::trace!(bits, "Primzahl erzeugt");
            return Ok(kandidat);
        }
    }
}

/// Miller-Rabin-Test mit festen kleinen Basen und `runden` Zufallsbasen
pub fn ist_wahrscheinlich_prim(n: &BigUint, runden: usize) -> bool {
    let zwei = BigUint::from(2_u8);
    let drei = BigUint::from(3_u8);
    if n < &zwei {
        return false;
    }
    for &p in &KLEINE_PRIMZAHLEN {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let n_minus_eins = n - BigUint::one();
    let mut d = n_minus_eins.clone();
    let mut s = 0_u32;
    while (&d % &zwei).is_zero() {
        d >>= 1;
        s += 1;
    }

    for &basis in &KLEINE_PRIMZAHLEN {
        let a = BigUint::from(basis);
        if a >= n_minus_eins {
            continue;
        }
        if ist_zeuge(n, &d, s, &a) {
            return false;
        }
    }

    let n_minus_drei = n - &drei;
    for _ in 0..runden {
        let Some(versatz) = zufall_unter(&n_minus_drei) else {
            return false;
        };
        let a = versatz + &zwei;
        if ist_zeuge(n, &d, s, &a) {
            return false;
        }
    }
    true
}

/// Prueft ob `a` bezeugt, dass `n` zusammengesetzt ist
fn ist_zeuge(n: &BigUint, d: &BigUint, s: u32, a: &BigUint) -> bool {
    let eins = BigUint::one();
    let n_minus_eins = n - &eins;
    let mut x = a.modpow(d, n);
    if x == eins || x == n_minus_eins {
        return false;
    }
    for _ in 1..s {
        x = x.modpow(&BigUint::from(2_u8), n);
        if x == n_minus_eins {
            return false;
        }
    }
    true
}

/// Gleichverteilte Zufallszahl in `[0, schranke)`
fn zufall_unter(schranke: &BigUint) -> Option<BigUint> {
    let bits = usize::try_from(schranke.bits()).ok()?;
    if bits == 0 {
        return None;
    }
    let byte_len = bits.div_ceil(8);
    let ueberschuss = byte_len * 8 - bits;
    let mut roh = vec![0u8; byte_len];
    for _ in 0..MAX_ZIEHUNGEN {
        OsRng.fill_bytes(&mut roh);
        roh[0] &= 0xff_u8 >> ueberschuss;
        let wert = BigUint::from_bytes_be(&roh);
        if &wert < schranke {
            return Some(wert);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Parameter und Session
// ---------------------------------------------------------------------------

/// Gruppenparameter eines Handshakes (Modulus und Generator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParameter {
    pub p: BigUint,
    pub g: BigUint,
}

impl DhParameter {
    /// Frische Parameter: neue Primzahl, Generator 2
    pub fn generate() -> CryptoResult<Self> {
        Ok(Self {
            p: generate_prime(PRIME_BITS)?,
            g: BigUint::from(GENERATOR),
        })
    }

    /// Parameter aus den empfangenen Big-Endian-Bytes
    pub fn aus_bytes(p: &[u8], g: &[u8]) -> CryptoResult<Self> {
        let p = BigUint::from_bytes_be(p);
        let g = BigUint::from_bytes_be(g);
        if p <= BigUint::from(3_u8) {
            return Err(CryptoError::KeyExchange(
                "Modulus fehlt oder ist zu klein".to_string(),
            ));
        }
        Ok(Self { p, g })
    }

    pub fn p_bytes(&self) -> Vec<u8> {
        self.p.to_bytes_be()
    }

    pub fn g_bytes(&self) -> Vec<u8> {
        self.g.to_bytes_be()
    }

    /// Bytes die ein Wert modulo P hoechstens belegt
    fn breite(&self) -> usize {
        (self.p.bits() as usize).div_ceil(8)
    }
}

/// Ephemere DH-Session einer Partei (Key-Hub oder Beitretender)
///
/// Der private Exponent kann genau einmal verwendet werden und wird danach
/// verworfen.
pub struct DhSession {
    parameter: DhParameter,
    private_key: Option<BigUint>,
    public_key: BigUint,
}

impl std::fmt::Debug for DhSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhSession")
            .field("p_bits", &self.parameter.p.bits())
            .field("verbraucht", &self.private_key.is_none())
            .finish()
    }
}

impl DhSession {
    /// Erzeugt einen privaten Exponenten in `[2, P-2]` und den oeffentlichen Wert
    pub fn new(parameter: DhParameter) -> CryptoResult<Self> {
        let obergrenze = &parameter.p - BigUint::from(3_u8);
        let private_key = zufall_unter(&obergrenze)
            .map(|x| x + BigUint::from(2_u8))
            .ok_or_else(|| {
                CryptoError::KeyExchange("privater Exponent nicht ziehbar".to_string())
            })?;
        let public_key = parameter.g.modpow(&private_key, &parameter.p);
        Ok(Self {
            parameter,
            private_key: Some(private_key),
            public_key,
        })
    }

    pub fn parameter(&self) -> &DhParameter {
        &self.parameter
    }

    /// Oeffentlicher Exponent als Big-Endian-Bytes
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.to_bytes_be()
    }

    /// Berechnet das gemeinsame Geheimnis aus dem oeffentlichen Wert der Gegenseite
    pub fn compute_shared_secret(&mut self, remote_public: &[u8]) -> CryptoResult<SharedSecret> {
        let privat = self
            .private_key
            .take()
            .ok_or_else(|| CryptoError::KeyExchange("Secret bereits verwendet".to_string()))?;

        let remote = BigUint::from_bytes_be(remote_public);
        let geheimnis = remote.modpow(&privat, &self.parameter.p);

        // Feste Breite, damit fuehrende Null-Bytes beide Seiten nicht trennen
        let roh = geheimnis.to_bytes_be();
        let breite = self.parameter.breite();
        let mut fest = vec![0u8; breite.saturating_sub(roh.len())];
        fest.extend_from_slice(&roh);

        Ok(SharedSecret(SecretBytes::new(fest)))
    }
}

// ---------------------------------------------------------------------------
// SharedSecret
// ---------------------------------------------------------------------------

/// Paarweises Geheimnis (PSK) zwischen Key-Hub und Beitretendem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSecret(SecretBytes);

impl SharedSecret {
    /// Rohes Geheimnis, Big-Endian mit fester Breite
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Leitet den 32-Byte-Schluessel ab, unter dem der Raum-Schluessel reist
    pub fn transport_key(&self) -> CryptoResult<SecretBytes> {
        hkdf_derive(self.0.as_bytes(), HKDF_SALT, HKDF_INFO, 32).map(SecretBytes::new)
    }
}

/// HKDF-SHA256 Key Derivation
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn kleine_parameter() -> DhParameter {
        DhParameter {
            p: BigUint::from(0xffff_fffb_u32), // 4294967291, prim
            g: BigUint::from(GENERATOR),
        }
    }

    #[test]
    fn primzahl_hat_volle_bitlaenge() {
        let p = generate_prime(PRIME_BITS).unwrap();
        assert_eq!(p.bits(), PRIME_BITS);
        assert!(ist_wahrscheinlich_prim(&p, 10));
    }

    #[test]
    fn primzahlen_sind_frisch() {
        let a = generate_prime(128).unwrap();
        let b = generate_prime(128).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn primtest_bekannte_werte() {
        for p in [2_u32, 3, 5, 41, 7919, 104_729, 4_294_967_291] {
            assert!(ist_wahrscheinlich_prim(&BigUint::from(p), 10), "{p} ist prim");
        }
        for n in [0_u32, 1, 4, 9, 561, 7917, 4_294_967_295] {
            assert!(!ist_wahrscheinlich_prim(&BigUint::from(n), 10), "{n} ist nicht prim");
        }
    }

    #[test]
    fn beide_seiten_berechnen_dasselbe_geheimnis() {
        for _ in 0..5 {
            let parameter = DhParameter::generate().unwrap();
            let mut hub = DhSession::new(parameter.clone()).unwrap();
            let mut beitretender = DhSession::new(parameter).unwrap();

            let hub_pub = hub.public_key_bytes();
            let beitretender_pub = beitretender.public_key_bytes();

            let s1 = hub.compute_shared_secret(&beitretender_pub).unwrap();
            let s2 = beitretender.compute_shared_secret(&hub_pub).unwrap();
            assert_eq!(s1, s2);
            assert_eq!(s1.as_bytes().len(), 32);
            assert_eq!(
                s1.transport_key().unwrap().as_bytes(),
                s2.transport_key().unwrap().as_bytes()
            );
        }
    }

    #[test]
    fn geheimnis_hat_feste_breite() {
        let parameter = kleine_parameter();
        for _ in 0..50 {
            let mut a = DhSession::new(parameter.clone()).unwrap();
            let b = DhSession::new(parameter.clone()).unwrap();
            let s = a.compute_shared_secret(&b.public_key_bytes()).unwrap();
            assert_eq!(s.as_bytes().len(), 4);
        }
    }

    #[test]
    fn parameter_ueber_den_draht() {
        let parameter = DhParameter::generate().unwrap();
        let zurueck = DhParameter::aus_bytes(&parameter.p_bytes(), &parameter.g_bytes()).unwrap();
        assert_eq!(zurueck, parameter);
        assert_eq!(parameter.g_bytes(), vec![2]);
    }

    #[test]
    fn leerer_modulus_wird_abgelehnt() {
        assert!(DhParameter::aus_bytes(&[], &[2]).is_err());
        assert!(DhParameter::aus_bytes(&[3], &[2]).is_err());
    }

    #[test]
    fn secret_kann_nur_einmal_verwendet_werden() {
        let mut session = DhSession::new(kleine_parameter()).unwrap();
        assert!(session.compute_shared_secret(&[5]).is_ok());
        assert!(matches!(
            session.compute_shared_secret(&[5]),
            Err(CryptoError::KeyExchange(_))
        ));
    }

    #[test]
    fn null_exponent_wird_nicht_validiert() {
        // Dokumentiertes Verhalten: keine Pruefung empfangener Werte
        let mut session = DhSession::new(kleine_parameter()).unwrap();
        let s = session.compute_shared_secret(&[0]).unwrap();
        assert!(s.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn hkdf_derive_deterministisch() {
        let k1 = hkdf_derive(b"ikm", b"salt", b"info", 32).unwrap();
        let k2 = hkdf_derive(b"ikm", b"salt", b"info", 32).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, hkdf_derive(b"ikm", b"salt", b"anders", 32).unwrap());
    }
}
