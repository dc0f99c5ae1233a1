//! Typed payloads carried by protocol messages.

use crate::{
    primitives::{group::Group, poly::Public, shamir::PublicKeys, zkp::Proof},
    seal::Evidence,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write};
use std::collections::{BTreeMap, BTreeSet};

/// Maximum size of an announced key.
pub const MAX_KEY_SIZE: usize = 128;

const PEDERSEN: u8 = 0;
const FELDMAN: u8 = 1;
const MASKING: u8 = 2;
const ACCUSATIONS: u8 = 3;
const REBUTTAL: u8 = 4;
const PROOF: u8 = 5;
const VIEW: u8 = 6;
const REKEY: u8 = 7;

/// The public part of a protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload<G: Group> {
    /// Pedersen commitment to a dealer's sharing polynomials (generation).
    Pedersen(Public<G::Element>),

    /// Feldman commitment to a zero-intercept polynomial (refresh).
    Feldman(Public<G::Element>),

    /// Feldman commitment to a polynomial that vanishes at `target` (reconstruction).
    Masking {
        target: u32,
        commitment: Public<G::Element>,
    },

    /// Dealers the sender accuses of sending it an invalid fragment.
    ///
    /// `target` identifies the reconstruction instance (if any).
    Accusations {
        target: Option<u32>,
        accused: BTreeSet<u32>,
    },

    /// Evidence for each fragment the sender was accused over, keyed by accuser.
    Rebuttal {
        target: Option<u32>,
        evidence: BTreeMap<u32, Evidence<G>>,
    },

    /// Proof binding the sender's share public key to the combined Pedersen commitment.
    Proof(Proof<G>),

    /// The sender's view of every share public key.
    View(PublicKeys<G::Element>),

    /// Freshly generated public keys, left as raw bytes so that malformed keys can be
    /// attributed to their sender instead of being dropped by the decoder.
    Rekey {
        verifier: Vec<u8>,
        encryption: Vec<u8>,
    },
}

fn write_bytes(bytes: &[u8], buf: &mut impl BufMut) {
    bytes.len().write(buf);
    buf.put_slice(bytes);
}

fn read_bytes(buf: &mut impl Buf, max: usize) -> Result<Vec<u8>, CodecError> {
    let range: RangeCfg = (0..=max).into();
    let len = usize::read_cfg(buf, &range)?;
    if buf.remaining() < len {
        return Err(CodecError::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

impl<G: Group> Write for Payload<G> {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Payload::Pedersen(commitment) => {
                PEDERSEN.write(buf);
                commitment.write(buf);
            }
            Payload::Feldman(commitment) => {
                FELDMAN.write(buf);
                commitment.write(buf);
            }
            Payload::Masking { target, commitment } => {
                MASKING.write(buf);
                target.write(buf);
                commitment.write(buf);
            }
            Payload::Accusations { target, accused } => {
                ACCUSATIONS.write(buf);
                target.write(buf);
                accused.len().write(buf);
                for index in accused {
                    index.write(buf);
                }
            }
            Payload::Rebuttal { target, evidence } => {
                REBUTTAL.write(buf);
                target.write(buf);
                evidence.len().write(buf);
                for (accuser, evidence) in evidence {
                    accuser.write(buf);
                    evidence.write(buf);
                }
            }
            Payload::Proof(proof) => {
                PROOF.write(buf);
                proof.write(buf);
            }
            Payload::View(view) => {
                VIEW.write(buf);
                view.write(buf);
            }
            Payload::Rekey {
                verifier,
                encryption,
            } => {
                REKEY.write(buf);
                write_bytes(verifier, buf);
                write_bytes(encryption, buf);
            }
        }
    }
}

/// Payloads are read with the number of shareholders, which bounds every collection they carry.
impl<G: Group> Read for Payload<G> {
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, n: &usize) -> Result<Self, CodecError> {
        let items: RangeCfg = (0..=*n).into();
        let payload = match u8::read(buf)? {
            PEDERSEN => Payload::Pedersen(Public::read_cfg(buf, n)?),
            FELDMAN => Payload::Feldman(Public::read_cfg(buf, n)?),
            MASKING => {
                let target = u32::read(buf)?;
                let commitment = Public::read_cfg(buf, n)?;
                Payload::Masking { target, commitment }
            }
            ACCUSATIONS => {
                let target = Option::<u32>::read(buf)?;
                let len = usize::read_cfg(buf, &items)?;
                let mut accused = BTreeSet::new();
                let mut last = None;
                for _ in 0..len {
                    let index = u32::read(buf)?;
                    if last.is_some_and(|last| last >= index) {
                        return Err(CodecError::Invalid(
                            "pross::wire::Payload",
                            "indices not sorted",
                        ));
                    }
                    last = Some(index);
                    accused.insert(index);
                }
                Payload::Accusations { target, accused }
            }
            REBUTTAL => {
                let target = Option::<u32>::read(buf)?;
                let len = usize::read_cfg(buf, &items)?;
                let mut evidence = BTreeMap::new();
                let mut last = None;
                for _ in 0..len {
                    let accuser = u32::read(buf)?;
                    if last.is_some_and(|last| last >= accuser) {
                        return Err(CodecError::Invalid(
                            "pross::wire::Payload",
                            "indices not sorted",
                        ));
                    }
                    last = Some(accuser);
                    evidence.insert(accuser, Evidence::read(buf)?);
                }
                Payload::Rebuttal { target, evidence }
            }
            PROOF => Payload::Proof(Proof::read(buf)?),
            VIEW => Payload::View(PublicKeys::read_cfg(buf, n)?),
            REKEY => {
                let verifier = read_bytes(buf, MAX_KEY_SIZE)?;
                let encryption = read_bytes(buf, MAX_KEY_SIZE)?;
                Payload::Rekey {
                    verifier,
                    encryption,
                }
            }
            tag => return Err(CodecError::InvalidEnum(tag)),
        };
        Ok(payload)
    }
}

impl<G: Group> EncodeSize for Payload<G> {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Payload::Pedersen(commitment) | Payload::Feldman(commitment) => {
                    commitment.encode_size()
                }
                Payload::Masking { target, commitment } => {
                    target.encode_size() + commitment.encode_size()
                }
                Payload::Accusations { target, accused } => {
                    target.encode_size() + accused.len().encode_size() + accused.len() * u32::SIZE
                }
                Payload::Rebuttal { target, evidence } => {
                    target.encode_size()
                        + evidence.len().encode_size()
                        + evidence
                            .values()
                            .map(|evidence| u32::SIZE + evidence.encode_size())
                            .sum::<usize>()
                }
                Payload::Proof(proof) => proof.encode_size(),
                Payload::View(view) => view.encode_size(),
                Payload::Rekey {
                    verifier,
                    encryption,
                } => {
                    verifier.len().encode_size()
                        + verifier.len()
                        + encryption.len().encode_size()
                        + encryption.len()
                }
            }
    }
}
