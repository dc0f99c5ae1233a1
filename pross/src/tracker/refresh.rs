//! Proactive share refresh.
//!
//! Every shareholder deals a sharing of zero (a polynomial without a constant term). Adding
//! the surviving fragments to a share re-randomizes it while leaving the secret (the value at
//! `x = 0`) untouched. Share public keys are shifted the same way, using the broadcast
//! commitments.
//!
//! ```text
//! Init -> SentUpdate -> ReceivedUpdates -> VerifiedUpdates -> MadeAccusations
//!      -> SentRebuttals -> ProcessedRebuttals -> PerformedUpdate
//! ```

use crate::{
    identity::KeyBook,
    primitives::{
        group::Group,
        poly::{self, Public},
        shamir::{self, PublicKeys, Share},
    },
    seal::{Evidence, Sealed},
    tracker::{
        at_least, ensure,
        vss::{Feldman, Round},
        Error, Reason,
    },
};
use p256::elliptic_curve::ff::Field;
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

const TRACKER: &str = "refresh";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Init,
    SentUpdate,
    ReceivedUpdates,
    VerifiedUpdates,
    MadeAccusations,
    SentRebuttals,
    ProcessedRebuttals,
    PerformedUpdate,
}

/// Tracks a single refresh run.
#[derive(Clone, Debug)]
pub struct Refresh<G: Group> {
    group: G,
    me: u32,
    n: u32,
    t: u32,
    update_threshold: u32,
    epoch: u64,
    state: State,
    round: Round<G, Feldman<G::Scalar>>,
}

impl<G: Group> Refresh<G> {
    pub fn new(group: G, me: u32, n: u32, t: u32, update_threshold: u32, epoch: u64) -> Self {
        let sharing = Feldman {
            zero: G::Scalar::ZERO,
        };
        let round = Round::new(group.clone(), sharing, me, n, t, (0..n).collect());
        Self {
            group,
            me,
            n,
            t,
            update_threshold,
            epoch,
            state: State::Init,
            round,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Deals a sharing of zero.
    pub fn deal<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        book: &KeyBook<G>,
        mut tamper: impl FnMut(&mut Share<G::Scalar>),
    ) -> Result<(Public<G::Element>, BTreeMap<u32, Sealed<G>>), Error> {
        ensure(TRACKER, &self.state, &[State::Init])?;
        let mask = poly::new_masking(self.t - 1, G::Scalar::ZERO, rng);
        let commitment = shamir::feldman(&self.group, &mask);
        let mut fragments = shamir::generate_shares(&mask, self.n);
        for fragment in fragments.iter_mut().filter(|f| f.index != self.me) {
            tamper(fragment);
        }
        let sealed = self.round.deal(rng, book, commitment.clone(), fragments)?;
        self.state = State::SentUpdate;
        debug!(me = self.me, epoch = self.epoch, "dealt refresh sharing");
        Ok((commitment, sealed))
    }

    pub fn receive(
        &mut self,
        dealer: u32,
        commitment: Public<G::Element>,
        sealed: BTreeMap<u32, Sealed<G>>,
    ) {
        if self.state > State::ReceivedUpdates {
            debug!(me = self.me, dealer, "ignoring late refresh dealing");
            return;
        }
        self.round.receive(dealer, commitment, sealed);
        if self.state == State::SentUpdate && self.round.dealings() == self.n as usize {
            self.state = State::ReceivedUpdates;
        }
    }

    pub fn violation(&mut self, dealer: u32, reason: Reason) {
        self.round.accuse(dealer, reason);
    }

    pub fn verify(&mut self, secret: &G::Scalar) -> Result<(), Error> {
        ensure(
            TRACKER,
            &self.state,
            &[State::SentUpdate, State::ReceivedUpdates],
        )?;
        self.round.verify(secret);
        self.state = State::VerifiedUpdates;
        Ok(())
    }

    pub fn accusations(
        &mut self,
        forge: impl FnOnce(&mut BTreeSet<u32>),
    ) -> Result<BTreeSet<u32>, Error> {
        ensure(TRACKER, &self.state, &[State::VerifiedUpdates])?;
        let mut accused = self.round.accused();
        forge(&mut accused);
        self.round.publish_accusations(accused.clone());
        self.state = State::MadeAccusations;
        Ok(accused)
    }

    pub fn receive_accusations(&mut self, accuser: u32, accused: BTreeSet<u32>) {
        if self.state >= State::ProcessedRebuttals {
            debug!(me = self.me, accuser, "ignoring late accusations");
            return;
        }
        self.round.receive_accusations(accuser, accused);
    }

    pub fn rebuttal(&mut self) -> Result<BTreeMap<u32, Evidence<G>>, Error> {
        ensure(TRACKER, &self.state, &[State::MadeAccusations])?;
        let evidence = self.round.rebuttal();
        self.state = State::SentRebuttals;
        Ok(evidence)
    }

    pub fn receive_rebuttal(&mut self, accused: u32, evidence: BTreeMap<u32, Evidence<G>>) {
        if self.state >= State::ProcessedRebuttals {
            debug!(me = self.me, accused, "ignoring late rebuttal");
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

    /// Adds every qualified fragment to `share` and shifts `public` by every qualified
    /// commitment.
    ///
    /// Requires at least `update_threshold` qualified dealers.
    pub fn update(
        &mut self,
        share: &Share<G::Scalar>,
        public: &PublicKeys<G::Element>,
    ) -> Result<(Share<G::Scalar>, PublicKeys<G::Element>), Error> {
        ensure(TRACKER, &self.state, &[State::ProcessedRebuttals])?;
        let qualified = self.round.qualified();
        at_least(qualified.len(), self.update_threshold)?;

        let mut private = share.private;
        let mut public = public.clone();
        for dealer in &qualified {
            private += self.round.fragment(*dealer)?.private;
            let commitment = self
                .round
                .commitment(*dealer)
                .ok_or(Error::MissingFragment(*dealer))?;
            public = public.updated(commitment);
        }
        let share = Share {
            index: share.index,
            private,
        };
        if public.get(self.me) != Some(&share.public(&self.group)) {
            return Err(Error::MismatchedShare);
        }
        self.state = State::PerformedUpdate;
        info!(me = self.me, epoch = self.epoch, qualified = ?qualified, "refreshed share");
        Ok((share, public))
    }
}
