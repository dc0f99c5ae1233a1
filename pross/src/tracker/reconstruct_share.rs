//! Rebuilding the share of a single corrupted shareholder.
//!
//! The surviving shareholders run a refresh whose masking polynomials vanish at the target's
//! x-coordinate instead of at zero. Once disputes are resolved, each survivor privately sends the
//! target its share plus every qualified fragment. Those contributions lie on a polynomial that
//! agrees with the original sharing at the target's position, so interpolating `t` of them there
//! recovers the target's share without revealing anyone else's.
//!
//! Every shareholder (including the target) observes the round so that all of them derive the
//! same qualified set. Only the survivors deal, accuse, rebut and contribute.

use crate::{
    identity::KeyBook,
    primitives::{
        group::Group,
        lagrange,
        poly::{self, Eval, Public},
        shamir::{self, PublicKeys, Share},
    },
    seal::{self, Evidence, Sealed},
    tracker::{
        at_least, ensure,
        vss::{Feldman, Round},
        Error, Reason,
    },
};
use commonware_codec::{DecodeExt, EncodeSize, Write};
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

const TRACKER: &str = "reconstruct_share";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Init,
    SentUpdate,
    VerifiedUpdates,
    MadeAccusations,
    SentRebuttals,
    ProcessedRebuttals,
    SentContribution,
    Rebuilt,
}

/// Tracks the rebuilding of `target`'s share.
#[derive(Clone, Debug)]
pub struct ReconstructShare<G: Group> {
    group: G,
    me: u32,
    n: u32,
    t: u32,
    target: u32,
    state: State,

    /// The share public keys agreed on by corruption detection.
    majority: PublicKeys<G::Element>,

    round: Round<G, Feldman<G::Scalar>>,

    /// Sealed contributions addressed to us, by sender (only used by the target).
    contributions: BTreeMap<u32, Sealed<G>>,
}

impl<G: Group> ReconstructShare<G> {
    /// Creates a tracker for rebuilding `target`'s share. Every index in `corrupt` (which must
    /// contain `target`) is barred from dealing.
    pub fn new(
        group: G,
        me: u32,
        n: u32,
        t: u32,
        target: u32,
        corrupt: &BTreeSet<u32>,
        majority: PublicKeys<G::Element>,
    ) -> Self {
        let sharing = Feldman {
            zero: poly::x(target),
        };
        let participants = (0..n).filter(|i| !corrupt.contains(i)).collect();
        let mut round = Round::new(group.clone(), sharing, me, n, t, participants);
        for index in corrupt {
            round.exclude(*index);
        }
        Self {
            group,
            me,
            n,
            t,
            target,
            state: State::Init,
            majority,
            round,
            contributions: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Returns whether we help rebuild the share (rather than just observe).
    pub fn is_participant(&self) -> bool {
        self.round.is_participant(self.me)
    }

    /// Deals a sharing that vanishes at the target (survivors only).
    pub fn deal<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        book: &KeyBook<G>,
        mut tamper: impl FnMut(&mut Share<G::Scalar>),
    ) -> Result<Option<(Public<G::Element>, BTreeMap<u32, Sealed<G>>)>, Error> {
        ensure(TRACKER, &self.state, &[State::Init])?;
        self.state = State::SentUpdate;
        if !self.is_participant() {
            return Ok(None);
        }
        let mask = poly::new_masking(self.t - 1, poly::x(self.target), rng);
        let commitment = shamir::feldman(&self.group, &mask);
        let mut fragments = shamir::generate_shares(&mask, self.n);
        for fragment in fragments.iter_mut().filter(|f| f.index != self.me) {
            tamper(fragment);
        }
        let sealed = self.round.deal(rng, book, commitment.clone(), fragments)?;
        debug!(me = self.me, rebuilding = self.target, "dealt reconstruction sharing");
        Ok(Some((commitment, sealed)))
    }

    pub fn receive(
        &mut self,
        dealer: u32,
        commitment: Public<G::Element>,
        sealed: BTreeMap<u32, Sealed<G>>,
    ) {
        if self.state > State::SentUpdate {
            debug!(me = self.me, dealer, rebuilding = self.target, "ignoring late dealing");
            return;
        }
        self.round.receive(dealer, commitment, sealed);
    }

    pub fn violation(&mut self, dealer: u32, reason: Reason) {
        self.round.accuse(dealer, reason);
    }

    pub fn verify(&mut self, secret: &G::Scalar) -> Result<(), Error> {
        ensure(TRACKER, &self.state, &[State::SentUpdate])?;
        if self.is_participant() {
            self.round.verify(secret);
        }
        self.state = State::VerifiedUpdates;
        Ok(())
    }

    /// Returns the accusations to publish (survivors only).
    pub fn accusations(
        &mut self,
        forge: impl FnOnce(&mut BTreeSet<u32>),
    ) -> Result<Option<BTreeSet<u32>>, Error> {
        ensure(TRACKER, &self.state, &[State::VerifiedUpdates])?;
        self.state = State::MadeAccusations;
        if !self.is_participant() {
            return Ok(None);
        }
        let mut accused = self.round.accused();
        forge(&mut accused);
        self.round.publish_accusations(accused.clone());
        Ok(Some(accused))
    }

    pub fn receive_accusations(&mut self, accuser: u32, accused: BTreeSet<u32>) {
        if self.state >= State::ProcessedRebuttals {
            debug!(me = self.me, accuser, rebuilding = self.target, "ignoring late accusations");
            return;
        }
        self.round.receive_accusations(accuser, accused);
    }

    /// Returns the evidence to publish (survivors only).
    pub fn rebuttal(&mut self) -> Result<Option<BTreeMap<u32, Evidence<G>>>, Error> {
        ensure(TRACKER, &self.state, &[State::MadeAccusations])?;
        self.state = State::SentRebuttals;
        if !self.is_participant() {
            return Ok(None);
        }
        Ok(Some(self.round.rebuttal()))
    }

    pub fn receive_rebuttal(&mut self, accused: u32, evidence: BTreeMap<u32, Evidence<G>>) {
        if self.state >= State::ProcessedRebuttals {
            debug!(me = self.me, accused, rebuilding = self.target, "ignoring late rebuttal");
            return;
        }
        self.round.receive_rebuttal(accused, evidence);
    }

    pub fn process_rebuttals(&mut self, book: &KeyBook<G>) -> Result<BTreeSet<u32>, Error> {
        ensure(TRACKER, &self.state, &[State::SentRebuttals])?;
        let excluded = self.round.resolve(book);
        self.state = State::ProcessedRebuttals;
        Ok(excluded)
    }

    /// Returns our share plus every qualified fragment, sealed to the target.
    ///
    /// Returns `None` if we are not a survivor or were excluded during disputes.
    pub fn contribute<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        book: &KeyBook<G>,
        share: Option<&Share<G::Scalar>>,
        tamper: impl FnOnce(&mut Share<G::Scalar>),
    ) -> Result<Option<Sealed<G>>, Error> {
        ensure(TRACKER, &self.state, &[State::ProcessedRebuttals])?;
        if !self.is_participant() || self.round.excluded().contains(&self.me) {
            self.state = State::SentContribution;
            return Ok(None);
        }
        let share = share.ok_or(Error::MissingShare)?;
        let qualified = self.round.qualified();
        at_least(qualified.len(), self.t)?;
        let mut contribution = *share;
        for dealer in &qualified {
            contribution.private += self.round.fragment(*dealer)?.private;
        }
        tamper(&mut contribution);

        let mut plaintext = Vec::with_capacity(contribution.encode_size());
        contribution.write(&mut plaintext);
        let result = seal::seal(&self.group, rng, book.encryption(self.target)?, &plaintext);
        plaintext.zeroize();
        let (sealed, _) = result?;
        self.state = State::SentContribution;
        debug!(me = self.me, rebuilding = self.target, "sent contribution");
        Ok(Some(sealed))
    }

    /// Records a sealed contribution from `sender` (target only).
    pub fn receive_contribution(&mut self, sender: u32, sealed: Sealed<G>) {
        if self.me != self.target || self.state >= State::Rebuilt {
            debug!(me = self.me, sender, rebuilding = self.target, "ignoring contribution");
            return;
        }
        if !self.round.is_participant(sender) {
            warn!(me = self.me, sender, "ignoring contribution from non-participant");
            return;
        }
        if self.contributions.contains_key(&sender) {
            warn!(me = self.me, sender, reason = ?Reason::Duplicate, "ignoring contribution");
            return;
        }
        self.contributions.insert(sender, sealed);
    }

    /// Checks that a contribution lies on the combined polynomial: `g^c` must equal the
    /// sender's agreed share public key shifted by every qualified commitment.
    fn check_contribution(
        &self,
        sender: u32,
        contribution: &Share<G::Scalar>,
        qualified: &BTreeSet<u32>,
    ) -> Result<(), Reason> {
        if contribution.index != sender {
            return Err(Reason::WrongIndex);
        }
        let mut expected = *self.majority.get(sender).ok_or(Reason::Malformed)?;
        for dealer in qualified {
            let commitment = self.round.commitment(*dealer).ok_or(Reason::Absent)?;
            expected = self
                .group
                .add(&expected, &shamir::share_public_key(commitment, sender));
        }
        if contribution.public(&self.group) != expected {
            return Err(Reason::CommitmentMismatch);
        }
        Ok(())
    }

    /// Recovers the target's share from at least `t` verified contributions (target only).
    ///
    /// Returns `None` if we are not the target.
    pub fn rebuild(&mut self, secret: &G::Scalar) -> Result<Option<Share<G::Scalar>>, Error> {
        ensure(TRACKER, &self.state, &[State::SentContribution])?;
        if self.me != self.target {
            self.state = State::Rebuilt;
            return Ok(None);
        }
        let qualified = self.round.qualified();
        let excluded = self.round.excluded().clone();
        let mut evals = Vec::new();
        for (sender, sealed) in &self.contributions {
            if excluded.contains(sender) {
                debug!(me = self.me, sender, "ignoring contribution from excluded party");
                continue;
            }
            let Ok(mut plaintext) = seal::open(&self.group, sealed, secret) else {
                warn!(me = self.me, sender, "contribution failed to decrypt");
                continue;
            };
            let contribution = Share::<G::Scalar>::decode(&plaintext[..]);
            plaintext.zeroize();
            let Ok(contribution) = contribution else {
                warn!(me = self.me, sender, reason = ?Reason::Malformed, "rejecting contribution");
                continue;
            };
            if let Err(reason) = self.check_contribution(*sender, &contribution, &qualified) {
                warn!(me = self.me, sender, ?reason, "rejecting contribution");
                continue;
            }
            evals.push(Eval {
                index: contribution.index,
                value: contribution.private,
            });
        }
        at_least(evals.len(), self.t)?;

        let private = lagrange::interpolate(&evals, self.t, &poly::x::<G::Scalar>(self.target))?;
        let share = Share {
            index: self.target,
            private,
        };
        if self.majority.get(self.target) != Some(&share.public(&self.group)) {
            return Err(Error::MismatchedShare);
        }
        self.contributions.clear();
        self.state = State::Rebuilt;
        info!(me = self.me, contributions = evals.len(), "rebuilt share");
        Ok(Some(share))
    }
}
