//! Distributed key generation.
//!
//! Every shareholder deals a Pedersen sharing of a random secret (so the commitment it
//! broadcasts reveals nothing about that secret). Fragments that fail verification are
//! accused and publicly resolved. Each shareholder then sums the fragments of every qualified
//! dealer to form its share of the combined secret.
//!
//! Pedersen commitments hide the share public keys, so each shareholder finally reveals
//! `g^{s_i}` with a proof binding it to the combined commitment. Once `t` proofs verify, the
//! share public key of every shareholder (and of the secret) is interpolated in the exponent
//! and the Feldman commitment to the combined polynomial is recovered.
//!
//! ```text
//! Init -> SentUpdate -> ReceivedUpdates -> Verified -> Accused -> Rebutted
//!      -> ProcessedRebuttals -> ShareGenerated -> SentProof -> ComputedPublicKeys
//! ```

use crate::{
    identity::KeyBook,
    primitives::{
        group::Group,
        matrix::interpolate_coefficients,
        poly::{self, Eval, Public},
        shamir::{self, PedersenShare, PublicKeys, Share},
        zkp::{self, Proof},
    },
    seal::{Evidence, Sealed},
    tracker::{
        at_least, ensure,
        vss::{Pedersen, Round},
        Error, Reason,
    },
};
use p256::elliptic_curve::ff::Field;
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

const TRACKER: &str = "generation";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Init,
    SentUpdate,
    ReceivedUpdates,
    Verified,
    Accused,
    Rebutted,
    ProcessedRebuttals,
    ShareGenerated,
    SentProof,
    ComputedPublicKeys,
}

/// The result of a successful generation.
#[derive(Clone, Debug)]
pub struct Output<G: Group> {
    pub share: Share<G::Scalar>,
    pub public: PublicKeys<G::Element>,

    /// Feldman commitment to the combined sharing polynomial.
    pub commitment: Public<G::Element>,

    /// Dealers whose sharing contributed to the secret.
    pub qualified: BTreeSet<u32>,
}

/// Tracks a single run of distributed key generation.
#[derive(Clone, Debug)]
pub struct Generation<G: Group> {
    group: G,
    me: u32,
    n: u32,
    t: u32,
    epoch: u64,
    state: State,
    round: Round<G, Pedersen>,

    share: Option<PedersenShare<G::Scalar>>,
    combined: Option<Public<G::Element>>,
    qualified: BTreeSet<u32>,
    proofs: BTreeMap<u32, Proof<G>>,
}

impl<G: Group> Generation<G> {
    pub fn new(group: G, me: u32, n: u32, t: u32, epoch: u64) -> Self {
        let round = Round::new(group.clone(), Pedersen, me, n, t, (0..n).collect());
        Self {
            group,
            me,
            n,
            t,
            epoch,
            state: State::Init,
            round,
            share: None,
            combined: None,
            qualified: BTreeSet::new(),
            proofs: BTreeMap::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Deals a Pedersen sharing of a fresh random secret.
    ///
    /// `tamper` is invoked on every fragment addressed to another shareholder before it is
    /// sealed.
    pub fn deal<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        book: &KeyBook<G>,
        mut tamper: impl FnMut(&mut Share<G::Scalar>),
    ) -> Result<(Public<G::Element>, BTreeMap<u32, Sealed<G>>), Error> {
        ensure(TRACKER, &self.state, &[State::Init])?;
        let secret = poly::new_from::<G::Scalar, _>(self.t - 1, rng);
        let blinding = poly::new_from::<G::Scalar, _>(self.t - 1, rng);
        let commitment = shamir::pedersen(&self.group, &secret, &blinding);
        let fragments = (0..self.n)
            .map(|i| {
                let mut fragment = PedersenShare {
                    share: Share {
                        index: i,
                        private: secret.evaluate(i).value,
                    },
                    blinding: blinding.evaluate(i).value,
                };
                if i != self.me {
                    tamper(&mut fragment.share);
                }
                fragment
            })
            .collect();
        let sealed = self.round.deal(rng, book, commitment.clone(), fragments)?;
        self.state = State::SentUpdate;
        debug!(me = self.me, epoch = self.epoch, "dealt generation sharing");
        Ok((commitment, sealed))
    }

    /// Records a dealing broadcast by another shareholder.
    pub fn receive(
        &mut self,
        dealer: u32,
        commitment: Public<G::Element>,
        sealed: BTreeMap<u32, Sealed<G>>,
    ) {
        if self.state > State::ReceivedUpdates {
            debug!(me = self.me, dealer, "ignoring late dealing");
            return;
        }
        self.round.receive(dealer, commitment, sealed);
        if self.state == State::SentUpdate && self.round.dealings() == self.n as usize {
            self.state = State::ReceivedUpdates;
        }
    }

    /// Marks a dealer that sent a malformed dealing.
    pub fn violation(&mut self, dealer: u32, reason: Reason) {
        self.round.accuse(dealer, reason);
    }

    /// Verifies every fragment addressed to us.
    pub fn verify(&mut self, secret: &G::Scalar) -> Result<(), Error> {
        ensure(
            TRACKER,
            &self.state,
            &[State::SentUpdate, State::ReceivedUpdates],
        )?;
        self.round.verify(secret);
        self.state = State::Verified;
        Ok(())
    }

    /// Returns the accusations to publish (after `forge` has had a chance to adjust them).
    pub fn accusations(
        &mut self,
        forge: impl FnOnce(&mut BTreeSet<u32>),
    ) -> Result<BTreeSet<u32>, Error> {
        ensure(TRACKER, &self.state, &[State::Verified])?;
        let mut accused = self.round.accused();
        forge(&mut accused);
        self.round.publish_accusations(accused.clone());
        self.state = State::Accused;
        Ok(accused)
    }

    pub fn receive_accusations(&mut self, accuser: u32, accused: BTreeSet<u32>) {
        if self.state >= State::ProcessedRebuttals {
            debug!(me = self.me, accuser, "ignoring late accusations");
            return;
        }
        self.round.receive_accusations(accuser, accused);
    }

    /// Returns the evidence answering every accusation against us.
    pub fn rebuttal(&mut self) -> Result<BTreeMap<u32, Evidence<G>>, Error> {
        ensure(TRACKER, &self.state, &[State::Accused])?;
        let evidence = self.round.rebuttal();
        self.state = State::Rebutted;
        Ok(evidence)
    }

    pub fn receive_rebuttal(&mut self, accused: u32, evidence: BTreeMap<u32, Evidence<G>>) {
        if self.state >= State::ProcessedRebuttals {
            debug!(me = self.me, accused, "ignoring late rebuttal");
            return;
        }
        self.round.receive_rebuttal(accused, evidence);
    }

    /// Resolves every accusation. Returns the excluded dealers.
    pub fn process_rebuttals(&mut self, book: &KeyBook<G>) -> Result<BTreeSet<u32>, Error> {
        ensure(TRACKER, &self.state, &[State::Rebutted])?;
        let excluded = self.round.resolve(book);
        self.state = State::ProcessedRebuttals;
        Ok(excluded)
    }

    /// Sums the fragments of every qualified dealer into our share.
    pub fn generate_share(&mut self) -> Result<BTreeSet<u32>, Error> {
        ensure(TRACKER, &self.state, &[State::ProcessedRebuttals])?;
        let qualified = self.round.qualified();
        at_least(qualified.len(), self.t)?;

        let mut private = G::Scalar::ZERO;
        let mut blinding = G::Scalar::ZERO;
        let mut combined: Option<Public<G::Element>> = None;
        for dealer in &qualified {
            let fragment = self.round.fragment(*dealer)?;
            private += fragment.share.private;
            blinding += fragment.blinding;
            let commitment = self
                .round
                .commitment(*dealer)
                .ok_or(Error::MissingFragment(*dealer))?;
            combined = Some(match combined.take() {
                Some(mut sum) => {
                    sum.add(commitment);
                    sum
                }
                None => commitment.clone(),
            });
        }
        self.share = Some(PedersenShare {
            share: Share {
                index: self.me,
                private,
            },
            blinding,
        });
        self.combined = combined;
        self.qualified = qualified.clone();
        self.state = State::ShareGenerated;
        info!(me = self.me, qualified = ?qualified, "generated share");
        Ok(qualified)
    }

    /// Proves our share public key is consistent with the combined commitment.
    pub fn prove<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Proof<G>, Error> {
        ensure(TRACKER, &self.state, &[State::ShareGenerated])?;
        let (Some(share), Some(combined)) = (&self.share, &self.combined) else {
            return Err(Error::MissingShare);
        };
        let proof = zkp::prove(
            &self.group,
            rng,
            &share.share.private,
            &share.blinding,
            &combined.evaluate(self.me).value,
        );
        self.proofs.insert(self.me, proof.clone());
        self.state = State::SentProof;
        Ok(proof)
    }

    pub fn receive_proof(&mut self, sender: u32, proof: Proof<G>) {
        if sender == self.me {
            return;
        }
        if self.state >= State::ComputedPublicKeys {
            debug!(me = self.me, sender, "ignoring late proof");
            return;
        }
        if self.proofs.contains_key(&sender) {
            warn!(me = self.me, sender, "ignoring duplicate proof");
            return;
        }
        self.proofs.insert(sender, proof);
    }

    /// Interpolates every share public key from `t` valid proofs.
    pub fn finalize(&mut self) -> Result<Output<G>, Error> {
        ensure(TRACKER, &self.state, &[State::SentProof])?;
        let (Some(share), Some(combined)) = (&self.share, &self.combined) else {
            return Err(Error::MissingShare);
        };

        // Collect share public keys with a valid proof
        let mut evals = Vec::new();
        for (sender, proof) in &self.proofs {
            let expected = combined.evaluate(*sender).value;
            match zkp::verify(&self.group, proof, &expected) {
                Ok(()) => evals.push(Eval {
                    index: *sender,
                    value: proof.a,
                }),
                Err(err) => warn!(me = self.me, sender, ?err, "invalid proof"),
            }
        }
        at_least(evals.len(), self.t)?;

        // Recover the Feldman commitment from the first `t` (proofs are keyed by index)
        evals.truncate(self.t as usize);
        let commitment = interpolate_coefficients(&evals)?;
        let public = PublicKeys::from_commitment(&commitment, self.n);
        if public.get(self.me) != Some(&share.share.public(&self.group)) {
            return Err(Error::MismatchedShare);
        }
        self.state = State::ComputedPublicKeys;
        info!(me = self.me, epoch = self.epoch, "computed public keys");
        Ok(Output {
            share: share.share,
            public,
            commitment,
            qualified: self.qualified.clone(),
        })
    }
}
