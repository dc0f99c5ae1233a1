//! Misbehaving [Behavior] implementations for tests.

use crate::{
    primitives::{
        group::Group,
        shamir::{PublicKeys, Share},
    },
    shareholder::behavior::{Behavior, Operation},
};
use p256::elliptic_curve::ff::Field;
use std::collections::BTreeSet;

/// Deals a corrupted fragment to each victim during `operation` (and still rebuts).
#[derive(Clone, Debug)]
pub struct CorruptDealer {
    pub operation: Operation,
    pub victims: BTreeSet<u32>,
}

impl<G: Group> Behavior<G> for CorruptDealer {
    fn tamper_fragment(&mut self, operation: Operation, share: &mut Share<G::Scalar>) {
        if operation == self.operation && self.victims.contains(&share.index) {
            share.private += G::Scalar::ONE;
        }
    }
}

/// Deals a corrupted fragment to each victim during `operation` and never rebuts.
#[derive(Clone, Debug)]
pub struct LazyDealer {
    pub operation: Operation,
    pub victims: BTreeSet<u32>,
}

impl<G: Group> Behavior<G> for LazyDealer {
    fn tamper_fragment(&mut self, operation: Operation, share: &mut Share<G::Scalar>) {
        if operation == self.operation && self.victims.contains(&share.index) {
            share.private += G::Scalar::ONE;
        }
    }

    fn rebut(&mut self, operation: Operation) -> bool {
        operation != self.operation
    }
}

/// Accuses honest dealers during `operation`.
#[derive(Clone, Debug)]
pub struct ForgingAccuser {
    pub operation: Operation,
    pub accused: BTreeSet<u32>,
}

impl<G: Group> Behavior<G> for ForgingAccuser {
    fn forge_accusations(&mut self, operation: Operation, accused: &mut BTreeSet<u32>) {
        if operation == self.operation {
            accused.extend(self.accused.iter().copied());
        }
    }
}

/// Sends nothing during `operation`.
#[derive(Clone, Debug)]
pub struct Mute {
    pub operation: Operation,
}

impl<G: Group> Behavior<G> for Mute {
    fn mute(&mut self, operation: Operation) -> bool {
        operation == self.operation
    }
}

/// Reports a view in which the share public key of `index` is shifted by the generator.
#[derive(Clone, Debug)]
pub struct SkewedView<G: Group> {
    pub group: G,
    pub index: u32,
}

impl<G: Group> Behavior<G> for SkewedView<G> {
    fn tamper_view(&mut self, view: &mut PublicKeys<G::Element>) {
        if let Some(entry) = view.shares.get_mut(self.index as usize) {
            *entry = self.group.add(entry, &self.group.generator());
        }
    }
}

/// Announces the same bytes as both its signing and encryption key.
#[derive(Clone, Debug)]
pub struct IdenticalKeys;

impl<G: Group> Behavior<G> for IdenticalKeys {
    fn tamper_keys(&mut self, verifier: &mut Vec<u8>, encryption: &mut Vec<u8>) {
        *encryption = verifier.clone();
    }
}

/// Sends a corrupted contribution when helping rebuild a share.
#[derive(Clone, Debug)]
pub struct CorruptContributor;

impl<G: Group> Behavior<G> for CorruptContributor {
    fn tamper_contribution(&mut self, _target: u32, contribution: &mut Share<G::Scalar>) {
        contribution.private += G::Scalar::ONE;
    }
}
