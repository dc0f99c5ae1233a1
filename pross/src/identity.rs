//! Keys that identify a shareholder on the wire.
//!
//! Every shareholder holds a [KeyPair]: a signing key used to authenticate every message it
//! sends and a decryption key (with its public encryption key) used to open fragments sealed
//! for it. The public halves of every shareholder's keys are collected in a [KeyBook].
//!
//! Signing keys are [secp256r1] keys. Each [Signature] carries the [SignatureAlgorithm] that
//! produced it so verification is self-describing.

use crate::primitives::group::Group;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
pub use commonware_cryptography::secp256r1::{PrivateKey, PublicKey};
use commonware_cryptography::{secp256r1, PrivateKeyExt as _, Signer as _, Verifier as _};
use rand::{CryptoRng, RngCore};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors that can occur when handling keys.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unknown shareholder: {0}")]
    UnknownShareholder(u32),
}

/// Algorithm used to produce a [Signature].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    Secp256r1 = 0,
}

/// A signature tagged with the algorithm that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub algorithm: SignatureAlgorithm,
    pub signature: secp256r1::Signature,
}

impl Signature {
    /// Signs `message` under `namespace`.
    pub fn sign(signer: &PrivateKey, namespace: &[u8], message: &[u8]) -> Self {
        Self {
            algorithm: SignatureAlgorithm::Secp256r1,
            signature: signer.sign(Some(namespace), message),
        }
    }

    /// Verifies the signature over `message` under `namespace`.
    pub fn verify(&self, verifier: &PublicKey, namespace: &[u8], message: &[u8]) -> bool {
        match self.algorithm {
            SignatureAlgorithm::Secp256r1 => {
                verifier.verify(Some(namespace), message, &self.signature)
            }
        }
    }
}

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        (self.algorithm as u8).write(buf);
        self.signature.write(buf);
    }
}

impl Read for Signature {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let algorithm = match u8::read(buf)? {
            0 => SignatureAlgorithm::Secp256r1,
            tag => return Err(CodecError::InvalidEnum(tag)),
        };
        let signature = secp256r1::Signature::read(buf)?;
        Ok(Self {
            algorithm,
            signature,
        })
    }
}

impl EncodeSize for Signature {
    fn encode_size(&self) -> usize {
        u8::SIZE + self.signature.encode_size()
    }
}

/// The keys held by a single shareholder.
///
/// The decryption key is wiped when the pair is dropped.
#[derive(Clone)]
pub struct KeyPair<G: Group> {
    pub signer: PrivateKey,
    pub decryption: Zeroizing<G::Scalar>,
    pub encryption: G::Element,
}

impl<G: Group> KeyPair<G> {
    pub fn new<R: RngCore + CryptoRng>(group: &G, rng: &mut R) -> Self {
        let signer = PrivateKey::from_rng(rng);
        let decryption = Zeroizing::new(group.random_scalar(rng));
        let encryption = group.exp(&decryption);
        Self {
            signer,
            decryption,
            encryption,
        }
    }

    /// Returns the public halves of the key pair.
    pub fn public(&self) -> PeerKeys<G> {
        PeerKeys {
            verifier: self.signer.public_key(),
            encryption: self.encryption,
        }
    }
}

impl<G: Group> fmt::Debug for KeyPair<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("verifier", &self.signer.public_key())
            .field("encryption", &self.encryption)
            .finish_non_exhaustive()
    }
}

/// The public keys of a single shareholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerKeys<G: Group> {
    pub verifier: PublicKey,
    pub encryption: G::Element,
}

/// The public keys of every shareholder, indexed by shareholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyBook<G: Group> {
    peers: Vec<PeerKeys<G>>,
}

impl<G: Group> KeyBook<G> {
    pub fn new(peers: Vec<PeerKeys<G>>) -> Self {
        Self { peers }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&PeerKeys<G>> {
        self.peers.get(index as usize)
    }

    /// Returns the encryption key of a shareholder.
    pub fn encryption(&self, index: u32) -> Result<&G::Element, Error> {
        self.get(index)
            .map(|peer| &peer.encryption)
            .ok_or(Error::UnknownShareholder(index))
    }

    /// Returns the verifying key of a shareholder.
    pub fn verifier(&self, index: u32) -> Result<&PublicKey, Error> {
        self.get(index)
            .map(|peer| &peer.verifier)
            .ok_or(Error::UnknownShareholder(index))
    }

    /// Replaces the keys of a shareholder.
    pub fn update(&mut self, index: u32, keys: PeerKeys<G>) -> Result<(), Error> {
        let peer = self
            .peers
            .get_mut(index as usize)
            .ok_or(Error::UnknownShareholder(index))?;
        *peer = keys;
        Ok(())
    }
}
