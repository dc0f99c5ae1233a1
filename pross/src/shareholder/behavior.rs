//! Hooks invoked at every point where a shareholder sends or checks something.
//!
//! Honest shareholders use [Honest], which leaves everything untouched. Tests swap in other
//! implementations to exercise dispute resolution and detection.

use crate::primitives::{
    group::Group,
    shamir::{PublicKeys, Share},
};
use std::{collections::BTreeSet, fmt::Debug};

/// The protocol a hook is invoked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Generation,
    Refresh,
    Detection,
    Reconstruction,
    Rekey,
}

/// Overrides applied by a shareholder to what it sends.
///
/// Every method defaults to honest behavior.
pub trait Behavior<G: Group>: Debug + Send + 'static {
    /// Alters the fragment dealt to `share.index` (never called for our own fragment).
    fn tamper_fragment(&mut self, _operation: Operation, _share: &mut Share<G::Scalar>) {}

    /// Alters the contribution sent to rebuild `target`'s share.
    fn tamper_contribution(&mut self, _target: u32, _contribution: &mut Share<G::Scalar>) {}

    /// Alters the set of dealers we accuse.
    fn forge_accusations(&mut self, _operation: Operation, _accused: &mut BTreeSet<u32>) {}

    /// Returns whether to publish a rebuttal when accused.
    fn rebut(&mut self, _operation: Operation) -> bool {
        true
    }

    /// Returns whether to stay silent instead of sending.
    fn mute(&mut self, _operation: Operation) -> bool {
        false
    }

    /// Alters the view of share public keys we report during detection.
    fn tamper_view(&mut self, _view: &mut PublicKeys<G::Element>) {}

    /// Alters the encoded keys we announce during rekeying.
    fn tamper_keys(&mut self, _verifier: &mut Vec<u8>, _encryption: &mut Vec<u8>) {}
}

/// Follows the protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct Honest;

impl<G: Group> Behavior<G> for Honest {}
