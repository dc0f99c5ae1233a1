//! State machines for each protocol run.
//!
//! A tracker is created for a single run (keyed by epoch and, for reconstruction, by the
//! index being rebuilt) and advanced through a strictly ordered sequence of states by explicit
//! phase calls. Calling a phase out of order is a local driver bug and returns
//! [Error::InvalidState] rather than an accusation.
//!
//! Every check on data received from a peer produces a [Verification]. Anything other than
//! [Verification::Valid] turns into an accusation against the sender, which is then resolved
//! publicly by [dispute::Disputes].

pub mod dispute;
pub mod generation;
pub mod reconstruct_share;
pub mod reconstruction;
pub mod refresh;
pub mod rekey;
pub mod vss;

use crate::{identity, primitives, seal};
use std::fmt::Debug;
use thiserror::Error;

/// Errors that can occur when advancing a tracker.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid state for {tracker}: expected {expected}, found {found}")]
    InvalidState {
        tracker: &'static str,
        expected: String,
        found: String,
    },
    #[error("below threshold: {0} < {1}")]
    BelowThreshold(usize, u32),
    #[error("no majority view")]
    NoMajority,
    #[error("missing fragment from {0}")]
    MissingFragment(u32),
    #[error("missing share")]
    MissingShare,
    #[error("reconstructed share does not match public key")]
    MismatchedShare,
    #[error("primitives: {0}")]
    Primitives(#[from] primitives::Error),
    #[error("seal: {0}")]
    Seal(#[from] seal::Error),
    #[error("identity: {0}")]
    Identity(#[from] identity::Error),
}

/// Why a contribution was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    /// The sender sent more than one message for the same step.
    Duplicate,
    /// The commitment does not have exactly `t` coefficients.
    CommitmentLength,
    /// The sealed fragments are not addressed to exactly the indices `0..n`.
    MissingRecipients,
    /// The fragment is addressed to the wrong index.
    WrongIndex,
    /// The payload could not be decoded or has the wrong shape.
    Malformed,
    /// The fragment is inconsistent with the commitment.
    CommitmentMismatch,
    /// The commitment does not vanish where it must.
    NonZeroIntercept,
    /// The sender was marked corrupt by corruption detection.
    DetectedCorrupt,
    /// The sender never answered.
    Absent,
    /// The announced signing and encryption keys are identical.
    IdenticalKeys,
}

/// The outcome of verifying something received from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification<T = ()> {
    Valid(T),
    Inconsistent(Reason),
    DecryptFailed,
}

impl<T> Verification<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    /// Discards the verified value.
    pub fn outcome(&self) -> Verification {
        match self {
            Verification::Valid(_) => Verification::Valid(()),
            Verification::Inconsistent(reason) => Verification::Inconsistent(*reason),
            Verification::DecryptFailed => Verification::DecryptFailed,
        }
    }
}

/// Ensures a tracker is in one of the `expected` states.
pub(crate) fn ensure<S: Debug + PartialEq>(
    tracker: &'static str,
    state: &S,
    expected: &[S],
) -> Result<(), Error> {
    if expected.contains(state) {
        return Ok(());
    }
    Err(Error::InvalidState {
        tracker,
        expected: format!("{:?}", expected),
        found: format!("{:?}", state),
    })
}

/// Ensures at least `required` contributions survived.
pub(crate) fn at_least(found: usize, required: u32) -> Result<(), Error> {
    if found < required as usize {
        return Err(Error::BelowThreshold(found, required));
    }
    Ok(())
}
