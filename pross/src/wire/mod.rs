//! Signed protocol messages.
//!
//! Every message names its sender, the epoch it belongs to, and an [Opcode] identifying the
//! protocol step. Its [Content] is either public, sealed for a single recipient, or a public
//! payload accompanied by one sealed fragment per recipient. The encoded message is signed by
//! the sender and the [Signature] travels alongside it.

mod payload;
pub use payload::Payload;

use crate::{
    identity::{PrivateKey, PublicKey, Signature},
    primitives::group::Group,
    seal::Sealed,
};
use bytes::{Buf, BufMut};
use commonware_codec::{
    Encode, EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use std::collections::BTreeMap;

/// Unique namespace to avoid message replay attacks.
pub const NAMESPACE: &[u8] = b"_COMMONWARE_PROSS";

/// The protocol a message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    Generation,
    Refresh,
    Reconstruction,
    Rekey,
}

/// Protocol step that produced a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    DkgVss = 0,
    DkgAccusations = 1,
    DkgRebuttal = 2,
    DkgProof = 3,
    RefreshVss = 4,
    RefreshAccusations = 5,
    RefreshRebuttal = 6,
    ReconstructionDetect = 7,
    ReconstructionVss = 8,
    ReconstructionAccusations = 9,
    ReconstructionRebuttal = 10,
    ReconstructionContribution = 11,
    Rekey = 12,
}

impl Opcode {
    pub fn family(&self) -> Family {
        match self {
            Opcode::DkgVss | Opcode::DkgAccusations | Opcode::DkgRebuttal | Opcode::DkgProof => {
                Family::Generation
            }
            Opcode::RefreshVss | Opcode::RefreshAccusations | Opcode::RefreshRebuttal => {
                Family::Refresh
            }
            Opcode::ReconstructionDetect
            | Opcode::ReconstructionVss
            | Opcode::ReconstructionAccusations
            | Opcode::ReconstructionRebuttal
            | Opcode::ReconstructionContribution => Family::Reconstruction,
            Opcode::Rekey => Family::Rekey,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let opcode = match value {
            0 => Opcode::DkgVss,
            1 => Opcode::DkgAccusations,
            2 => Opcode::DkgRebuttal,
            3 => Opcode::DkgProof,
            4 => Opcode::RefreshVss,
            5 => Opcode::RefreshAccusations,
            6 => Opcode::RefreshRebuttal,
            7 => Opcode::ReconstructionDetect,
            8 => Opcode::ReconstructionVss,
            9 => Opcode::ReconstructionAccusations,
            10 => Opcode::ReconstructionRebuttal,
            11 => Opcode::ReconstructionContribution,
            12 => Opcode::Rekey,
            other => return Err(CodecError::InvalidEnum(other)),
        };
        Ok(opcode)
    }
}

const PUBLIC: u8 = 0;
const PRIVATE: u8 = 1;
const SEMI_PRIVATE: u8 = 2;

/// The body of a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content<G: Group> {
    /// Readable by everyone.
    Public(Payload<G>),

    /// Readable only by `recipient`.
    Private { recipient: u32, sealed: Sealed<G> },

    /// A public payload plus one sealed fragment per recipient.
    SemiPrivate {
        public: Payload<G>,
        sealed: BTreeMap<u32, Sealed<G>>,
    },
}

/// An unsigned protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<G: Group> {
    pub sender: u32,
    pub epoch: u64,
    pub opcode: Opcode,
    pub content: Content<G>,
}

/// A message and the sender's signature over its encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signed<G: Group> {
    pub message: Message<G>,
    pub signature: Signature,
}

impl<G: Group> Signed<G> {
    /// Signs a message.
    pub fn sign(signer: &PrivateKey, message: Message<G>) -> Self {
        let signature = Signature::sign(signer, NAMESPACE, &message.encode());
        Self { message, signature }
    }

    /// Verifies the signature against the sender's verifying key.
    pub fn verify(&self, verifier: &PublicKey) -> bool {
        self.signature
            .verify(verifier, NAMESPACE, &self.message.encode())
    }
}

impl<G: Group> Write for Content<G> {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Content::Public(payload) => {
                PUBLIC.write(buf);
                payload.write(buf);
            }
            Content::Private { recipient, sealed } => {
                PRIVATE.write(buf);
                recipient.write(buf);
                sealed.write(buf);
            }
            Content::SemiPrivate { public, sealed } => {
                SEMI_PRIVATE.write(buf);
                public.write(buf);
                sealed.len().write(buf);
                for (recipient, sealed) in sealed {
                    recipient.write(buf);
                    sealed.write(buf);
                }
            }
        }
    }
}

/// Content is read with the number of shareholders.
impl<G: Group> Read for Content<G> {
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, n: &usize) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            PUBLIC => Ok(Content::Public(Payload::read_cfg(buf, n)?)),
            PRIVATE => {
                let recipient = u32::read(buf)?;
                let sealed = Sealed::read(buf)?;
                Ok(Content::Private { recipient, sealed })
            }
            SEMI_PRIVATE => {
                let public = Payload::read_cfg(buf, n)?;
                let range: RangeCfg = (0..=*n).into();
                let len = usize::read_cfg(buf, &range)?;
                let mut fragments = BTreeMap::new();
                for _ in 0..len {
                    let recipient = u32::read(buf)?;
                    let sealed = Sealed::read(buf)?;
                    if fragments.insert(recipient, sealed).is_some() {
                        return Err(CodecError::Invalid(
                            "pross::wire::Content",
                            "duplicate recipient",
                        ));
                    }
                }
                Ok(Content::SemiPrivate {
                    public,
                    sealed: fragments,
                })
            }
            tag => Err(CodecError::InvalidEnum(tag)),
        }
    }
}

impl<G: Group> EncodeSize for Content<G> {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Content::Public(payload) => payload.encode_size(),
                Content::Private { sealed, .. } => u32::SIZE + sealed.encode_size(),
                Content::SemiPrivate { public, sealed } => {
                    public.encode_size()
                        + sealed.len().encode_size()
                        + sealed
                            .values()
                            .map(|sealed| u32::SIZE + sealed.encode_size())
                            .sum::<usize>()
                }
            }
    }
}

impl<G: Group> Write for Message<G> {
    fn write(&self, buf: &mut impl BufMut) {
        self.sender.write(buf);
        self.epoch.write(buf);
        (self.opcode as u8).write(buf);
        self.content.write(buf);
    }
}

/// Messages are read with the number of shareholders.
impl<G: Group> Read for Message<G> {
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, n: &usize) -> Result<Self, CodecError> {
        let sender = u32::read(buf)?;
        let epoch = u64::read(buf)?;
        let opcode = Opcode::try_from(u8::read(buf)?)?;
        let content = Content::read_cfg(buf, n)?;
        Ok(Self {
            sender,
            epoch,
            opcode,
            content,
        })
    }
}

impl<G: Group> EncodeSize for Message<G> {
    fn encode_size(&self) -> usize {
        u32::SIZE + u64::SIZE + u8::SIZE + self.content.encode_size()
    }
}

impl<G: Group> Write for Signed<G> {
    fn write(&self, buf: &mut impl BufMut) {
        self.message.write(buf);
        self.signature.write(buf);
    }
}

/// Signed messages are read with the number of shareholders.
impl<G: Group> Read for Signed<G> {
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, n: &usize) -> Result<Self, CodecError> {
        let message = Message::read_cfg(buf, n)?;
        let signature = Signature::read(buf)?;
        Ok(Self { message, signature })
    }
}

impl<G: Group> EncodeSize for Signed<G> {
    fn encode_size(&self) -> usize {
        self.message.encode_size() + self.signature.encode_size()
    }
}
