//! A single round of verifiable secret sharing with public dispute resolution.
//!
//! Each participating dealer broadcasts a commitment to its sharing polynomial together with
//! one sealed fragment per shareholder. Every participant opens its own fragment, checks it
//! against the dealer's commitment, and accuses the dealer if the check fails. Because the
//! sealed fragments are broadcast, any observer can re-open an accuser's fragment once the
//! dealer discloses the [Evidence] used to seal it.
//!
//! [Round] is shared by every tracker: generation deals Pedersen fragments, refresh deals
//! fragments of a zero-intercept polynomial, and reconstruction deals fragments of a
//! polynomial that vanishes at the index being rebuilt. [Sharing] captures those differences.

use crate::{
    identity::KeyBook,
    primitives::{
        group::Group,
        poly::Public,
        shamir::{self, PedersenShare, Share},
    },
    seal::{self, Evidence, Sealed},
    tracker::{dispute::Disputes, Error, Reason, Verification},
};
use commonware_codec::{Decode, EncodeSize, Read, Write};
use rand::{CryptoRng, RngCore};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
};
use tracing::{debug, warn};
use zeroize::Zeroize;

/// The kind of sharing dealt in a [Round].
pub trait Sharing<G: Group>: Clone + Debug {
    /// What each recipient receives from a dealer.
    type Fragment: Clone + Debug + Write + EncodeSize + Read<Cfg = ()>;

    /// Returns the share carried by a fragment.
    fn share(fragment: &Self::Fragment) -> &Share<G::Scalar>;

    /// Returns the share carried by a fragment (mutably).
    fn share_mut(fragment: &mut Self::Fragment) -> &mut Share<G::Scalar>;

    /// Checks properties of a commitment that do not depend on any fragment.
    fn check_commitment(&self, group: &G, commitment: &Public<G::Element>) -> Verification;

    /// Checks a fragment against a commitment.
    fn check_fragment(
        &self,
        group: &G,
        fragment: &Self::Fragment,
        commitment: &Public<G::Element>,
    ) -> Verification;
}

/// Fragments are Pedersen shares (a share plus its blinding value).
#[derive(Clone, Copy, Debug, Default)]
pub struct Pedersen;

impl<G: Group> Sharing<G> for Pedersen {
    type Fragment = PedersenShare<G::Scalar>;

    fn share(fragment: &Self::Fragment) -> &Share<G::Scalar> {
        &fragment.share
    }

    fn share_mut(fragment: &mut Self::Fragment) -> &mut Share<G::Scalar> {
        &mut fragment.share
    }

    fn check_commitment(&self, _: &G, _: &Public<G::Element>) -> Verification {
        Verification::Valid(())
    }

    fn check_fragment(
        &self,
        group: &G,
        fragment: &Self::Fragment,
        commitment: &Public<G::Element>,
    ) -> Verification {
        match shamir::verify_pedersen_share(group, fragment, commitment) {
            Ok(()) => Verification::Valid(()),
            Err(_) => Verification::Inconsistent(Reason::CommitmentMismatch),
        }
    }
}

/// Fragments are plain shares of a polynomial that must vanish at `zero`.
#[derive(Clone, Copy, Debug)]
pub struct Feldman<F> {
    pub zero: F,
}

impl<G: Group> Sharing<G> for Feldman<G::Scalar> {
    type Fragment = Share<G::Scalar>;

    fn share(fragment: &Self::Fragment) -> &Share<G::Scalar> {
        fragment
    }

    fn share_mut(fragment: &mut Self::Fragment) -> &mut Share<G::Scalar> {
        fragment
    }

    fn check_commitment(&self, group: &G, commitment: &Public<G::Element>) -> Verification {
        if commitment.evaluate_at(&self.zero) != group.identity() {
            return Verification::Inconsistent(Reason::NonZeroIntercept);
        }
        Verification::Valid(())
    }

    fn check_fragment(
        &self,
        group: &G,
        fragment: &Self::Fragment,
        commitment: &Public<G::Element>,
    ) -> Verification {
        match shamir::verify_share(group, fragment, commitment) {
            Ok(()) => Verification::Valid(()),
            Err(_) => Verification::Inconsistent(Reason::CommitmentMismatch),
        }
    }
}

/// Checks everything about a dealing that any observer can check.
fn check_public<G: Group, S: Sharing<G>>(
    group: &G,
    sharing: &S,
    n: u32,
    t: u32,
    commitment: &Public<G::Element>,
    sealed: &BTreeMap<u32, Sealed<G>>,
) -> Verification {
    if commitment.required() != t {
        return Verification::Inconsistent(Reason::CommitmentLength);
    }
    if !sealed.keys().copied().eq(0..n) {
        return Verification::Inconsistent(Reason::MissingRecipients);
    }
    sharing.check_commitment(group, commitment)
}

/// Checks the fragment addressed to `recipient`, opening it with `open`.
#[allow(clippy::too_many_arguments)]
fn check_fragment<G: Group, S: Sharing<G>>(
    group: &G,
    sharing: &S,
    n: u32,
    t: u32,
    recipient: u32,
    commitment: &Public<G::Element>,
    sealed: &BTreeMap<u32, Sealed<G>>,
    open: impl FnOnce(&Sealed<G>) -> Result<Vec<u8>, seal::Error>,
) -> Verification<S::Fragment> {
    let outcome = check_public(group, sharing, n, t, commitment, sealed);
    if !outcome.is_valid() {
        return lift(outcome);
    }
    let Some(ciphertext) = sealed.get(&recipient) else {
        return Verification::Inconsistent(Reason::MissingRecipients);
    };
    let mut plaintext = match open(ciphertext) {
        Ok(plaintext) => plaintext,
        Err(_) => return Verification::DecryptFailed,
    };
    let fragment = S::Fragment::decode_cfg(&plaintext[..], &());
    plaintext.zeroize();
    let Ok(fragment) = fragment else {
        return Verification::Inconsistent(Reason::Malformed);
    };
    if S::share(&fragment).index != recipient {
        return Verification::Inconsistent(Reason::WrongIndex);
    }
    match sharing.check_fragment(group, &fragment, commitment) {
        Verification::Valid(()) => Verification::Valid(fragment),
        outcome => lift(outcome),
    }
}

/// Carries a failed outcome over to another value type.
fn lift<T>(outcome: Verification) -> Verification<T> {
    match outcome {
        Verification::Inconsistent(reason) => Verification::Inconsistent(reason),
        Verification::DecryptFailed | Verification::Valid(()) => Verification::DecryptFailed,
    }
}

/// State of one verifiable secret sharing round, from the point of view of `me`.
#[derive(Clone, Debug)]
pub struct Round<G: Group, S: Sharing<G>> {
    group: G,
    sharing: S,
    me: u32,
    n: u32,
    t: u32,

    /// Parties allowed to deal, accuse and rebut.
    participants: BTreeSet<u32>,

    commitments: BTreeMap<u32, Public<G::Element>>,
    sealed: BTreeMap<u32, BTreeMap<u32, Sealed<G>>>,

    /// Verified fragments addressed to `me`, by dealer.
    fragments: BTreeMap<u32, S::Fragment>,

    /// Evidence for each fragment `me` sealed, by recipient.
    evidence: BTreeMap<u32, Evidence<G>>,

    /// Dealers `me` intends to accuse.
    accused: BTreeMap<u32, Reason>,

    /// Dealers seen sending two different dealings.
    equivocators: BTreeSet<u32>,

    disputes: Disputes<G>,
}

impl<G: Group, S: Sharing<G>> Round<G, S> {
    pub fn new(group: G, sharing: S, me: u32, n: u32, t: u32, participants: BTreeSet<u32>) -> Self {
        Self {
            group,
            sharing,
            me,
            n,
            t,
            participants,
            commitments: BTreeMap::new(),
            sealed: BTreeMap::new(),
            fragments: BTreeMap::new(),
            evidence: BTreeMap::new(),
            accused: BTreeMap::new(),
            equivocators: BTreeSet::new(),
            disputes: Disputes::new(),
        }
    }

    /// Returns whether `index` takes part in the round.
    pub fn is_participant(&self, index: u32) -> bool {
        self.participants.contains(&index)
    }

    /// Seals one fragment for each recipient and records the dealing as our own.
    pub fn deal<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        book: &KeyBook<G>,
        commitment: Public<G::Element>,
        fragments: Vec<S::Fragment>,
    ) -> Result<BTreeMap<u32, Sealed<G>>, Error> {
        let mut sealed = BTreeMap::new();
        for fragment in fragments {
            let recipient = S::share(&fragment).index;
            let mut plaintext = Vec::with_capacity(fragment.encode_size());
            fragment.write(&mut plaintext);
            let result = seal::seal(&self.group, rng, book.encryption(recipient)?, &plaintext);
            plaintext.zeroize();
            let (ciphertext, evidence) = result?;
            sealed.insert(recipient, ciphertext);
            self.evidence.insert(recipient, evidence);
            if recipient == self.me {
                self.fragments.insert(self.me, fragment);
            }
        }
        self.commitments.insert(self.me, commitment);
        self.sealed.insert(self.me, sealed.clone());
        Ok(sealed)
    }

    /// Records a dealing broadcast by `dealer`.
    pub fn receive(
        &mut self,
        dealer: u32,
        commitment: Public<G::Element>,
        sealed: BTreeMap<u32, Sealed<G>>,
    ) {
        if dealer == self.me {
            return;
        }
        if !self.is_participant(dealer) {
            debug!(dealer, "ignoring dealing from non-participant");
            return;
        }
        if let Some(recorded) = self.commitments.get(&dealer) {
            if *recorded == commitment && self.sealed.get(&dealer) == Some(&sealed) {
                debug!(dealer, "ignoring replayed dealing");
                return;
            }

            // Only the first dealing is kept, but the dealer can no longer be trusted
            self.equivocators.insert(dealer);
            self.accuse(dealer, Reason::Duplicate);
            return;
        }
        self.commitments.insert(dealer, commitment);
        self.sealed.insert(dealer, sealed);
    }

    /// Returns the number of dealings recorded (including our own).
    pub fn dealings(&self) -> usize {
        self.commitments.len()
    }

    /// Marks `dealer` for accusation.
    pub fn accuse(&mut self, dealer: u32, reason: Reason) {
        if dealer == self.me || self.accused.contains_key(&dealer) {
            return;
        }
        warn!(me = self.me, dealer, ?reason, "accusing dealer");
        self.accused.insert(dealer, reason);
    }

    /// Opens and checks every fragment addressed to us, accusing dealers whose fragment fails.
    pub fn verify(&mut self, secret: &G::Scalar) {
        let mut failures = Vec::new();
        for (dealer, commitment) in &self.commitments {
            if *dealer == self.me || self.fragments.contains_key(dealer) {
                continue;
            }
            let Some(sealed) = self.sealed.get(dealer) else {
                continue;
            };
            let outcome = check_fragment(
                &self.group,
                &self.sharing,
                self.n,
                self.t,
                self.me,
                commitment,
                sealed,
                |ciphertext| seal::open(&self.group, ciphertext, secret),
            );
            match outcome {
                Verification::Valid(fragment) => {
                    self.fragments.insert(*dealer, fragment);
                }
                Verification::Inconsistent(reason) => failures.push((*dealer, reason)),
                Verification::DecryptFailed => failures.push((*dealer, Reason::Malformed)),
            }
        }
        for (dealer, reason) in failures {
            self.accuse(dealer, reason);
        }
    }

    /// Returns the dealers we intend to accuse.
    pub fn accused(&self) -> BTreeSet<u32> {
        self.accused.keys().copied().collect()
    }

    /// Records the accusations we published.
    pub fn publish_accusations(&mut self, accused: BTreeSet<u32>) {
        self.disputes.record_accusations(self.me, accused);
    }

    /// Records accusations published by `accuser`.
    pub fn receive_accusations(&mut self, accuser: u32, accused: BTreeSet<u32>) {
        if accuser == self.me {
            return;
        }
        if !self.is_participant(accuser) {
            debug!(accuser, "ignoring accusations from non-participant");
            return;
        }
        self.disputes.record_accusations(accuser, accused);
    }

    /// Returns (and records) the evidence for every fragment we were accused over.
    pub fn rebuttal(&mut self) -> BTreeMap<u32, Evidence<G>> {
        let evidence = self
            .disputes
            .accusers_of(self.me)
            .into_iter()
            .filter_map(|accuser| {
                self.evidence
                    .get(&accuser)
                    .map(|evidence| (accuser, evidence.clone()))
            })
            .collect::<BTreeMap<_, _>>();
        self.disputes.record_rebuttal(self.me, evidence.clone());
        evidence
    }

    /// Records a rebuttal published by `accused`.
    pub fn receive_rebuttal(&mut self, accused: u32, evidence: BTreeMap<u32, Evidence<G>>) {
        if accused == self.me {
            return;
        }
        if !self.is_participant(accused) {
            debug!(accused, "ignoring rebuttal from non-participant");
            return;
        }
        self.disputes.record_rebuttal(accused, evidence);
    }

    /// Excludes a party from the round regardless of any dispute.
    pub fn exclude(&mut self, index: u32) {
        self.disputes.exclude(index);
    }

    /// Resolves every accusation, re-opening disputed fragments with the published evidence.
    ///
    /// If one of our own accusations is overturned, the fragment opened with the evidence is
    /// kept. Returns every excluded party.
    pub fn resolve(&mut self, book: &KeyBook<G>) -> BTreeSet<u32> {
        let me = self.me;
        let (n, t) = (self.n, self.t);
        let group = &self.group;
        let sharing = &self.sharing;
        let commitments = &self.commitments;
        let sealed = &self.sealed;
        let equivocators = &self.equivocators;
        let fragments = &mut self.fragments;
        let excluded = self.disputes.resolve(|accuser, accused, evidence| {
            if equivocators.contains(&accused) {
                return Verification::Inconsistent(Reason::Duplicate);
            }
            let (Some(commitment), Some(sealed)) = (commitments.get(&accused), sealed.get(&accused))
            else {
                return Verification::Inconsistent(Reason::Absent);
            };
            let Ok(recipient) = book.encryption(accuser) else {
                return Verification::Inconsistent(Reason::Malformed);
            };
            let outcome = check_fragment(group, sharing, n, t, accuser, commitment, sealed, |c| {
                seal::open_with_evidence(group, c, evidence, recipient)
            });
            match outcome {
                Verification::Valid(fragment) => {
                    if accuser == me {
                        fragments.insert(accused, fragment);
                    }
                    Verification::Valid(())
                }
                outcome => outcome.outcome(),
            }
        });
        excluded.clone()
    }

    /// Returns every dealer whose dealing survived: received, publicly well-formed, and not
    /// excluded by a dispute.
    pub fn qualified(&self) -> BTreeSet<u32> {
        self.commitments
            .iter()
            .filter(|(dealer, _)| !self.disputes.is_excluded(**dealer))
            .filter(|(dealer, commitment)| {
                self.sealed.get(dealer).is_some_and(|sealed| {
                    check_public(
                        &self.group,
                        &self.sharing,
                        self.n,
                        self.t,
                        commitment,
                        sealed,
                    )
                    .is_valid()
                })
            })
            .map(|(dealer, _)| *dealer)
            .collect()
    }

    /// Returns the verified fragment dealt to us by `dealer`.
    pub fn fragment(&self, dealer: u32) -> Result<&S::Fragment, Error> {
        self.fragments
            .get(&dealer)
            .ok_or(Error::MissingFragment(dealer))
    }

    pub fn commitment(&self, dealer: u32) -> Option<&Public<G::Element>> {
        self.commitments.get(&dealer)
    }

    pub fn excluded(&self) -> &BTreeSet<u32> {
        self.disputes.excluded()
    }
}
