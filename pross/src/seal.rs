//! Seal payloads for a single recipient and, if challenged, prove what was sealed.
//!
//! # Design
//!
//! A payload is sealed to a recipient's encryption key `pk = g^sk` by sampling an ephemeral
//! scalar `r`, publishing `R = g^r`, and deriving a ChaCha20-Poly1305 key and nonce with
//! HKDF-SHA256 from the shared point `pk^r` (salted with `R`). The recipient recomputes the
//! shared point as `R^sk`.
//!
//! The sender keeps `r` as [Evidence]. Disclosing it lets any observer recompute `pk^r` and
//! open that one payload (and only that payload). Because observers first check `g^r == R`,
//! the evidence is bound to the ciphertext: a sender cannot present evidence that opens a
//! ciphertext to anything other than what the recipient saw.

use crate::primitives::group::{
    element_size, read_element, read_scalar, scalar_size, write_element, write_scalar, Group,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, Write};
use commonware_utils::union;
use chacha20poly1305::{
    aead::{generic_array::typenum::Unsigned, Aead},
    AeadCore, ChaCha20Poly1305, KeyInit as _, Nonce,
};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Unique namespace used when deriving sealing keys.
const SEAL_NAMESPACE: &[u8] = b"_COMMONWARE_PROSS_SEAL";

/// The amount of overhead in a ciphertext, compared to the plain message.
pub const CIPHERTEXT_OVERHEAD: usize = <ChaCha20Poly1305 as AeadCore>::TagSize::USIZE;

/// Maximum size of a sealed payload.
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Size of the symmetric key.
const KEY_SIZE: usize = 32;

/// Size of the nonce.
const NONCE_SIZE: usize = <ChaCha20Poly1305 as AeadCore>::NonceSize::USIZE;

/// Errors that can occur when sealing or opening.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("evidence does not match ciphertext")]
    EvidenceMismatch,
}

/// A payload sealed for one recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed<G: Group> {
    /// `R = g^r`
    pub ephemeral: G::Element,
    pub ciphertext: Vec<u8>,
}

/// The ephemeral scalar used to seal a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evidence<G: Group> {
    pub ephemeral: G::Scalar,
}

fn cipher<G: Group>(
    group: &G,
    recipient: &G::Element,
    ephemeral: &G::Element,
    shared: &G::Element,
) -> Result<(ChaCha20Poly1305, Nonce), Error> {
    let mut ikm = group.encode(shared);
    let hk = Hkdf::<Sha256>::new(Some(&group.encode(ephemeral)), &ikm);
    let mut okm = [0u8; KEY_SIZE + NONCE_SIZE];
    let info = union(SEAL_NAMESPACE, &group.encode(recipient));
    let result = hk
        .expand(&info, &mut okm)
        .map_err(|_| Error::KeyDerivation)
        .and_then(|_| {
            let cipher = ChaCha20Poly1305::new_from_slice(&okm[..KEY_SIZE])
                .map_err(|_| Error::KeyDerivation)?;
            let nonce = *Nonce::from_slice(&okm[KEY_SIZE..]);
            Ok((cipher, nonce))
        });
    ikm.zeroize();
    okm.zeroize();
    result
}

/// Seals `payload` for the holder of the decryption key behind `recipient`.
pub fn seal<G: Group, R: RngCore + CryptoRng>(
    group: &G,
    rng: &mut R,
    recipient: &G::Element,
    payload: &[u8],
) -> Result<(Sealed<G>, Evidence<G>), Error> {
    let r = group.random_scalar(rng);
    let ephemeral = group.exp(&r);
    let shared = group.multiply(recipient, &r);
    let (cipher, nonce) = cipher(group, recipient, &ephemeral, &shared)?;
    let ciphertext = cipher
        .encrypt(&nonce, payload)
        .map_err(|_| Error::EncryptionFailed)?;
    Ok((
        Sealed {
            ephemeral,
            ciphertext,
        },
        Evidence { ephemeral: r },
    ))
}

/// Opens a sealed payload with the recipient's decryption key.
pub fn open<G: Group>(group: &G, sealed: &Sealed<G>, secret: &G::Scalar) -> Result<Vec<u8>, Error> {
    let shared = group.multiply(&sealed.ephemeral, secret);
    let (cipher, nonce) = cipher(group, &group.exp(secret), &sealed.ephemeral, &shared)?;
    cipher
        .decrypt(&nonce, sealed.ciphertext.as_ref())
        .map_err(|_| Error::DecryptionFailed)
}

/// Opens a sealed payload using disclosed evidence and the recipient's public encryption key.
pub fn open_with_evidence<G: Group>(
    group: &G,
    sealed: &Sealed<G>,
    evidence: &Evidence<G>,
    recipient: &G::Element,
) -> Result<Vec<u8>, Error> {
    if group.exp(&evidence.ephemeral) != sealed.ephemeral {
        return Err(Error::EvidenceMismatch);
    }
    let shared = group.multiply(recipient, &evidence.ephemeral);
    let (cipher, nonce) = cipher(group, recipient, &sealed.ephemeral, &shared)?;
    cipher
        .decrypt(&nonce, sealed.ciphertext.as_ref())
        .map_err(|_| Error::DecryptionFailed)
}

impl<G: Group> Write for Sealed<G> {
    fn write(&self, buf: &mut impl BufMut) {
        write_element(&self.ephemeral, buf);
        self.ciphertext.len().write(buf);
        buf.put_slice(&self.ciphertext);
    }
}

impl<G: Group> Read for Sealed<G> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let ephemeral = read_element(buf)?;
        let range: RangeCfg = (CIPHERTEXT_OVERHEAD..=MAX_PAYLOAD_SIZE + CIPHERTEXT_OVERHEAD).into();
        let len = usize::read_cfg(buf, &range)?;
        if buf.remaining() < len {
            return Err(CodecError::EndOfBuffer);
        }
        let mut ciphertext = vec![0u8; len];
        buf.copy_to_slice(&mut ciphertext);
        Ok(Self {
            ephemeral,
            ciphertext,
        })
    }
}

impl<G: Group> EncodeSize for Sealed<G> {
    fn encode_size(&self) -> usize {
        element_size::<G::Element>()
            + self.ciphertext.len().encode_size()
            + self.ciphertext.len()
    }
}

impl<G: Group> Write for Evidence<G> {
    fn write(&self, buf: &mut impl BufMut) {
        write_scalar(&self.ephemeral, buf);
    }
}

impl<G: Group> Read for Evidence<G> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let ephemeral = read_scalar(buf)?;
        Ok(Self { ephemeral })
    }
}

impl<G: Group> EncodeSize for Evidence<G> {
    fn encode_size(&self) -> usize {
        scalar_size::<G::Scalar>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::group::P256;
    use commonware_codec::{DecodeExt, Encode};
    use commonware_macros::test_traced;
    use rand::{rngs::StdRng, SeedableRng};

    fn keypair(group: &P256, rng: &mut StdRng) -> (<P256 as Group>::Scalar, <P256 as Group>::Element) {
        let secret = group.random_scalar(rng);
        (secret, group.exp(&secret))
    }

    #[test_traced]
    fn test_seal_open() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (secret, public) = keypair(&group, &mut rng);
        let (sealed, _) = seal(&group, &mut rng, &public, b"fragment").unwrap();
        assert_eq!(sealed.ciphertext.len(), 8 + CIPHERTEXT_OVERHEAD);
        assert_eq!(open(&group, &sealed, &secret).unwrap(), b"fragment");
    }

    #[test_traced]
    fn test_wrong_key() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (_, public) = keypair(&group, &mut rng);
        let (other, _) = keypair(&group, &mut rng);
        let (sealed, _) = seal(&group, &mut rng, &public, b"fragment").unwrap();
        assert_eq!(open(&group, &sealed, &other), Err(Error::DecryptionFailed));
    }

    #[test_traced]
    fn test_tampered_ciphertext() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (secret, public) = keypair(&group, &mut rng);
        let (mut sealed, evidence) = seal(&group, &mut rng, &public, b"fragment").unwrap();
        sealed.ciphertext[0] ^= 1;
        assert_eq!(open(&group, &sealed, &secret), Err(Error::DecryptionFailed));
        assert_eq!(
            open_with_evidence(&group, &sealed, &evidence, &public),
            Err(Error::DecryptionFailed)
        );
    }

    #[test_traced]
    fn test_open_with_evidence() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (_, public) = keypair(&group, &mut rng);
        let (sealed, evidence) = seal(&group, &mut rng, &public, b"fragment").unwrap();
        assert_eq!(
            open_with_evidence(&group, &sealed, &evidence, &public).unwrap(),
            b"fragment"
        );
    }

    #[test_traced]
    fn test_evidence_bound_to_ciphertext() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (_, public) = keypair(&group, &mut rng);
        let (sealed, _) = seal(&group, &mut rng, &public, b"first").unwrap();
        let (_, other) = seal(&group, &mut rng, &public, b"second").unwrap();
        assert_eq!(
            open_with_evidence(&group, &sealed, &other, &public),
            Err(Error::EvidenceMismatch)
        );
    }

    #[test_traced]
    fn test_codec() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (_, public) = keypair(&group, &mut rng);
        let (sealed, evidence) = seal(&group, &mut rng, &public, b"fragment").unwrap();
        let encoded = sealed.encode();
        assert_eq!(encoded.len(), sealed.encode_size());
        assert_eq!(Sealed::decode(encoded).unwrap(), sealed);
        assert_eq!(Evidence::decode(evidence.encode()).unwrap(), evidence);
    }

    #[test_traced]
    fn test_ciphertext_too_short() {
        let group = P256::new();
        let sealed = Sealed::<P256> {
            ephemeral: group.generator(),
            ciphertext: vec![0u8; CIPHERTEXT_OVERHEAD - 1],
        };
        assert!(matches!(
            Sealed::<P256>::decode(sealed.encode()),
            Err(CodecError::InvalidLength(len)) if len == CIPHERTEXT_OVERHEAD - 1
        ));
    }

    #[test_traced]
    fn test_recipient_bound() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (_, public) = keypair(&group, &mut rng);
        let (_, other) = keypair(&group, &mut rng);
        let (sealed, evidence) = seal(&group, &mut rng, &public, b"fragment").unwrap();
        assert_eq!(
            open_with_evidence(&group, &sealed, &evidence, &other),
            Err(Error::DecryptionFailed)
        );
    }
}
