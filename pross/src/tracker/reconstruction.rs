//! Corruption detection followed by reconstruction of every corrupted share.
//!
//! Every shareholder broadcasts its view of the share public keys (with its own entry replaced
//! by `g^y` of the share it actually holds). The view held by a strict majority becomes the
//! agreed state and anyone who disagreed (or never answered) is marked corrupt. Each corrupt
//! index is then rebuilt by its own [ReconstructShare] instance.
//!
//! ```text
//! Init -> SentView -> Detected -> SentUpdate -> VerifiedUpdates -> MadeAccusations
//!      -> SentRebuttals -> ProcessedRebuttals -> SentContributions -> Rebuilt
//! ```

use crate::{
    identity::KeyBook,
    primitives::{
        group::Group,
        poly::Public,
        shamir::{PublicKeys, Share},
    },
    seal::{Evidence, Sealed},
    tracker::{ensure, reconstruct_share::ReconstructShare, Error, Reason},
};
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

const TRACKER: &str = "reconstruction";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Init,
    SentView,
    Detected,
    SentUpdate,
    VerifiedUpdates,
    MadeAccusations,
    SentRebuttals,
    ProcessedRebuttals,
    SentContributions,
    Rebuilt,
}

/// A dealing for one reconstruction instance.
pub type Dealing<G> = (
    Public<<G as Group>::Element>,
    BTreeMap<u32, Sealed<G>>,
);

/// Tracks detection and reconstruction for one epoch.
#[derive(Clone, Debug)]
pub struct Reconstruction<G: Group> {
    group: G,
    me: u32,
    n: u32,
    t: u32,
    epoch: u64,
    state: State,

    views: BTreeMap<u32, PublicKeys<G::Element>>,

    /// Parties that sent more than one view or a view of the wrong size.
    malformed: BTreeSet<u32>,

    majority: Option<PublicKeys<G::Element>>,
    corrupt: BTreeSet<u32>,

    /// One instance per corrupt index.
    instances: BTreeMap<u32, ReconstructShare<G>>,
}

impl<G: Group> Reconstruction<G> {
    pub fn new(group: G, me: u32, n: u32, t: u32, epoch: u64) -> Self {
        Self {
            group,
            me,
            n,
            t,
            epoch,
            state: State::Init,
            views: BTreeMap::new(),
            malformed: BTreeSet::new(),
            majority: None,
            corrupt: BTreeSet::new(),
            instances: BTreeMap::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the agreed share public keys (once detection completes).
    pub fn majority(&self) -> Option<&PublicKeys<G::Element>> {
        self.majority.as_ref()
    }

    /// Returns every index marked corrupt (once detection completes).
    pub fn corrupt(&self) -> &BTreeSet<u32> {
        &self.corrupt
    }

    /// Returns our view of the share public keys.
    ///
    /// Our own entry is recomputed from the share we hold (the identity if we hold none), so
    /// a lost or altered share shows up as a disagreement. `tamper` is applied last.
    pub fn view(
        &mut self,
        share: Option<&Share<G::Scalar>>,
        public: Option<&PublicKeys<G::Element>>,
        tamper: impl FnOnce(&mut PublicKeys<G::Element>),
    ) -> Result<PublicKeys<G::Element>, Error> {
        ensure(TRACKER, &self.state, &[State::Init])?;
        let mut view = match public {
            Some(public) => public.clone(),
            None => PublicKeys {
                secret: self.group.identity(),
                shares: vec![self.group.identity(); self.n as usize],
            },
        };
        if let Some(entry) = view.shares.get_mut(self.me as usize) {
            *entry = match share {
                Some(share) => share.public(&self.group),
                None => self.group.identity(),
            };
        }
        tamper(&mut view);
        self.views.insert(self.me, view.clone());
        self.state = State::SentView;
        Ok(view)
    }

    pub fn receive_view(&mut self, sender: u32, view: PublicKeys<G::Element>) {
        if sender == self.me {
            return;
        }
        if self.state > State::SentView {
            debug!(me = self.me, sender, "ignoring late view");
            return;
        }
        if view.len() != self.n as usize {
            warn!(me = self.me, sender, reason = ?Reason::Malformed, "rejecting view");
            self.malformed.insert(sender);
            return;
        }
        if self.views.contains_key(&sender) {
            warn!(me = self.me, sender, reason = ?Reason::Duplicate, "rejecting view");
            self.malformed.insert(sender);
            return;
        }
        self.views.insert(sender, view);
    }

    /// Tallies the views and marks every party outside the majority as corrupt.
    ///
    /// Fails with [Error::NoMajority] unless a single view is held by more than `n/2` parties.
    pub fn count_votes(&mut self) -> Result<BTreeSet<u32>, Error> {
        ensure(TRACKER, &self.state, &[State::SentView])?;
        let mut tally: Vec<(&PublicKeys<G::Element>, BTreeSet<u32>)> = Vec::new();
        for (sender, view) in &self.views {
            if self.malformed.contains(sender) {
                continue;
            }
            match tally.iter_mut().find(|(candidate, _)| *candidate == view) {
                Some((_, voters)) => {
                    voters.insert(*sender);
                }
                None => tally.push((view, BTreeSet::from([*sender]))),
            }
        }
        let Some((majority, voters)) = tally.into_iter().max_by_key(|(_, voters)| voters.len())
        else {
            return Err(Error::NoMajority);
        };
        if voters.len() * 2 <= self.n as usize {
            warn!(me = self.me, votes = voters.len(), n = self.n, "no majority view");
            return Err(Error::NoMajority);
        }
        let majority = majority.clone();
        let corrupt = (0..self.n)
            .filter(|i| !voters.contains(i))
            .collect::<BTreeSet<_>>();
        for target in &corrupt {
            warn!(
                me = self.me,
                index = target,
                epoch = self.epoch,
                reason = ?Reason::DetectedCorrupt,
                "marked corrupt"
            );
            let instance = ReconstructShare::new(
                self.group.clone(),
                self.me,
                self.n,
                self.t,
                *target,
                &corrupt,
                majority.clone(),
            );
            self.instances.insert(*target, instance);
        }
        self.majority = Some(majority);
        self.corrupt = corrupt.clone();
        self.views.clear();
        self.state = State::Detected;
        info!(me = self.me, epoch = self.epoch, corrupt = ?corrupt, "detected corruption");
        Ok(corrupt)
    }

    /// Deals one sharing per corrupt index (skipped if we are corrupt ourselves).
    pub fn deal<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        book: &KeyBook<G>,
        mut tamper: impl FnMut(u32, &mut Share<G::Scalar>),
    ) -> Result<BTreeMap<u32, Dealing<G>>, Error> {
        ensure(TRACKER, &self.state, &[State::Detected])?;
        let mut dealings = BTreeMap::new();
        for (target, instance) in self.instances.iter_mut() {
            if let Some(dealing) = instance.deal(rng, book, |share| tamper(*target, share))? {
                dealings.insert(*target, dealing);
            }
        }
        self.state = State::SentUpdate;
        Ok(dealings)
    }

    /// Routes a dealing to the instance rebuilding `target`.
    pub fn receive(
        &mut self,
        dealer: u32,
        target: u32,
        commitment: Public<G::Element>,
        sealed: BTreeMap<u32, Sealed<G>>,
    ) {
        match self.instances.get_mut(&target) {
            Some(instance) => instance.receive(dealer, commitment, sealed),
            None => debug!(me = self.me, dealer, rebuilding = target, "ignoring dealing for unknown target"),
        }
    }

    pub fn violation(&mut self, dealer: u32, target: u32, reason: Reason) {
        if let Some(instance) = self.instances.get_mut(&target) {
            instance.violation(dealer, reason);
        }
    }

    pub fn verify(&mut self, secret: &G::Scalar) -> Result<(), Error> {
        ensure(TRACKER, &self.state, &[State::SentUpdate])?;
        for instance in self.instances.values_mut() {
            instance.verify(secret)?;
        }
        self.state = State::VerifiedUpdates;
        Ok(())
    }

    /// Returns the accusations to publish, by target.
    pub fn accusations(
        &mut self,
        mut forge: impl FnMut(u32, &mut BTreeSet<u32>),
    ) -> Result<BTreeMap<u32, BTreeSet<u32>>, Error> {
        ensure(TRACKER, &self.state, &[State::VerifiedUpdates])?;
        let mut accusations = BTreeMap::new();
        for (target, instance) in self.instances.iter_mut() {
            if let Some(accused) = instance.accusations(|accused| forge(*target, accused))? {
                accusations.insert(*target, accused);
            }
        }
        self.state = State::MadeAccusations;
        Ok(accusations)
    }

    pub fn receive_accusations(&mut self, accuser: u32, target: u32, accused: BTreeSet<u32>) {
        match self.instances.get_mut(&target) {
            Some(instance) => instance.receive_accusations(accuser, accused),
            None => debug!(me = self.me, accuser, rebuilding = target, "ignoring accusations for unknown target"),
        }
    }

    /// Returns the evidence to publish, by target.
    pub fn rebuttal(&mut self) -> Result<BTreeMap<u32, BTreeMap<u32, Evidence<G>>>, Error> {
        ensure(TRACKER, &self.state, &[State::MadeAccusations])?;
        let mut rebuttals = BTreeMap::new();
        for (target, instance) in self.instances.iter_mut() {
            if let Some(evidence) = instance.rebuttal()? {
                rebuttals.insert(*target, evidence);
            }
        }
        self.state = State::SentRebuttals;
        Ok(rebuttals)
    }

    pub fn receive_rebuttal(
        &mut self,
        accused: u32,
        target: u32,
        evidence: BTreeMap<u32, Evidence<G>>,
    ) {
        match self.instances.get_mut(&target) {
            Some(instance) => instance.receive_rebuttal(accused, evidence),
            None => debug!(me = self.me, accused, rebuilding = target, "ignoring rebuttal for unknown target"),
        }
    }

    /// Resolves disputes in every instance, returning the exclusions by target.
    pub fn process_rebuttals(
        &mut self,
        book: &KeyBook<G>,
    ) -> Result<BTreeMap<u32, BTreeSet<u32>>, Error> {
        ensure(TRACKER, &self.state, &[State::SentRebuttals])?;
        let mut excluded = BTreeMap::new();
        for (target, instance) in self.instances.iter_mut() {
            excluded.insert(*target, instance.process_rebuttals(book)?);
        }
        self.state = State::ProcessedRebuttals;
        Ok(excluded)
    }

    /// Returns our sealed contribution for each target we help rebuild.
    pub fn contributions<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        book: &KeyBook<G>,
        share: Option<&Share<G::Scalar>>,
        mut tamper: impl FnMut(u32, &mut Share<G::Scalar>),
    ) -> Result<BTreeMap<u32, Sealed<G>>, Error> {
        ensure(TRACKER, &self.state, &[State::ProcessedRebuttals])?;
        let mut contributions = BTreeMap::new();
        for (target, instance) in self.instances.iter_mut() {
            let sealed = instance.contribute(rng, book, share, |c| tamper(*target, c))?;
            if let Some(sealed) = sealed {
                contributions.insert(*target, sealed);
            }
        }
        self.state = State::SentContributions;
        Ok(contributions)
    }

    /// Records a contribution addressed to us.
    pub fn receive_contribution(&mut self, sender: u32, sealed: Sealed<G>) {
        match self.instances.get_mut(&self.me) {
            Some(instance) => instance.receive_contribution(sender, sealed),
            None => debug!(me = self.me, sender, "ignoring contribution: not corrupt"),
        }
    }

    /// Completes every instance. If we were marked corrupt, returns our rebuilt share.
    pub fn rebuild(&mut self, secret: &G::Scalar) -> Result<Option<Share<G::Scalar>>, Error> {
        ensure(TRACKER, &self.state, &[State::SentContributions])?;
        let mut rebuilt = None;
        for instance in self.instances.values_mut() {
            if let Some(share) = instance.rebuild(secret)? {
                rebuilt = Some(share);
            }
        }
        self.state = State::Rebuilt;
        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::KeyPair,
        primitives::{group::P256, poly::new_from, shamir},
    };
    use commonware_macros::test_traced;
    use p256::{elliptic_curve::ff::Field, Scalar};
    use rand::{rngs::StdRng, SeedableRng};

    type Keys = PublicKeys<<P256 as Group>::Element>;

    fn setup(n: u32, t: u32) -> (P256, Vec<Share<Scalar>>, Keys, Vec<Reconstruction<P256>>) {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let secret = new_from::<Scalar, _>(t - 1, &mut rng);
        let shares = shamir::generate_shares(&secret, n);
        let public = PublicKeys::from_commitment(&shamir::feldman(&group, &secret), n);
        let trackers = (0..n)
            .map(|i| Reconstruction::new(group, i, n, t, 1))
            .collect();
        (group, shares, public, trackers)
    }

    /// Exchanges views, using `share_of` and `public_of` to pick what each party reports.
    fn detect(
        trackers: &mut [Reconstruction<P256>],
        share_of: impl Fn(u32) -> Option<Share<Scalar>>,
        public_of: impl Fn(u32) -> Keys,
    ) -> Vec<Result<BTreeSet<u32>, Error>> {
        let views = trackers
            .iter_mut()
            .map(|tracker| {
                let me = tracker.me;
                let view = tracker
                    .view(share_of(me).as_ref(), Some(&public_of(me)), |_| {})
                    .unwrap();
                (me, view)
            })
            .collect::<Vec<_>>();
        trackers
            .iter_mut()
            .map(|tracker| {
                for (sender, view) in &views {
                    tracker.receive_view(*sender, view.clone());
                }
                tracker.count_votes()
            })
            .collect()
    }

    fn set(indices: &[u32]) -> BTreeSet<u32> {
        indices.iter().copied().collect()
    }

    #[test_traced]
    fn test_detect_none() {
        let (_, shares, public, mut trackers) = setup(4, 2);
        let results = detect(&mut trackers, |i| Some(shares[i as usize]), |_| public.clone());
        for result in results {
            assert!(result.unwrap().is_empty());
        }
        assert_eq!(trackers[0].majority(), Some(&public));
    }

    #[test_traced]
    fn test_detect_lost_share() {
        let (_, shares, public, mut trackers) = setup(5, 3);
        let results = detect(
            &mut trackers,
            |i| (i != 3).then(|| shares[i as usize]),
            |_| public.clone(),
        );
        for result in results {
            assert_eq!(result.unwrap(), set(&[3]));
        }
    }

    #[test_traced]
    fn test_detect_altered_share() {
        let (_, shares, public, mut trackers) = setup(5, 3);
        let results = detect(
            &mut trackers,
            |i| {
                let mut share = shares[i as usize];
                if i == 1 {
                    share.private += Scalar::ONE;
                }
                Some(share)
            },
            |_| public.clone(),
        );
        for result in results {
            assert_eq!(result.unwrap(), set(&[1]));
        }
    }

    #[test_traced]
    fn test_detect_silent_and_malformed() {
        let (_, shares, public, mut trackers) = setup(7, 3);
        let views = trackers
            .iter_mut()
            .map(|t| {
                let share = shares[t.me as usize];
                (t.me, t.view(Some(&share), Some(&public), |_| {}).unwrap())
            })
            .collect::<Vec<_>>();
        let mut short = public.clone();
        short.shares.pop();

        // 4 never answers, 3 answers twice and 2 sends a short view
        for tracker in trackers.iter_mut() {
            for (sender, view) in views.iter().filter(|(s, _)| *s != 4 && *s != 2) {
                tracker.receive_view(*sender, view.clone());
            }
            tracker.receive_view(3, views[0].1.clone());
            tracker.receive_view(2, short.clone());
        }
        for tracker in trackers.iter_mut().filter(|t| ![2, 3, 4].contains(&t.me)) {
            assert_eq!(tracker.count_votes().unwrap(), set(&[2, 3, 4]));
        }
    }

    #[test_traced]
    fn test_no_majority() {
        let (group, shares, public, mut trackers) = setup(4, 2);

        // Two parties report a different (but mutually consistent) view
        let mut other = public.clone();
        other.shares[0] = group.add(&other.shares[0], &group.generator());
        let results = detect(
            &mut trackers,
            |i| Some(shares[i as usize]),
            |i| if i >= 2 { other.clone() } else { public.clone() },
        );
        for result in results {
            assert!(matches!(result, Err(Error::NoMajority)));
        }
    }

    #[test_traced]
    fn test_reconstruct_lost_share() {
        let (n, t) = (5, 3);
        let (group, shares, public, mut trackers) = setup(n, t);
        let mut rng = StdRng::seed_from_u64(1);
        let keys = (0..n)
            .map(|_| KeyPair::new(&group, &mut rng))
            .collect::<Vec<_>>();
        let book = KeyBook::new(keys.iter().map(|k| k.public()).collect());
        let share_of = |i: u32| (i != 0).then(|| shares[i as usize]);
        for result in detect(&mut trackers, share_of, |_| public.clone()) {
            assert_eq!(result.unwrap(), set(&[0]));
        }

        let mut dealings = Vec::new();
        for tracker in trackers.iter_mut() {
            let dealt = tracker.deal(&mut rng, &book, |_, _| {}).unwrap();
            dealings.push((tracker.me, dealt));
        }
        for tracker in trackers.iter_mut() {
            for (dealer, dealt) in &dealings {
                for (target, (commitment, sealed)) in dealt {
                    tracker.receive(*dealer, *target, commitment.clone(), sealed.clone());
                }
            }
            tracker.verify(&keys[tracker.me as usize].decryption).unwrap();
        }
        let accusations = trackers
            .iter_mut()
            .map(|t| (t.me, t.accusations(|_, _| {}).unwrap()))
            .collect::<Vec<_>>();
        for tracker in trackers.iter_mut() {
            for (accuser, by_target) in &accusations {
                for (target, accused) in by_target {
                    tracker.receive_accusations(*accuser, *target, accused.clone());
                }
            }
        }
        let rebuttals = trackers
            .iter_mut()
            .map(|t| (t.me, t.rebuttal().unwrap()))
            .collect::<Vec<_>>();
        let mut contributions = Vec::new();
        for tracker in trackers.iter_mut() {
            for (accused, by_target) in &rebuttals {
                for (target, evidence) in by_target {
                    tracker.receive_rebuttal(*accused, *target, evidence.clone());
                }
            }
            tracker.process_rebuttals(&book).unwrap();
            let me = tracker.me;
            let sealed = tracker
                .contributions(&mut rng, &book, share_of(me).as_ref(), |_, _| {})
                .unwrap();
            contributions.push((me, sealed));
        }
        let mut rebuilt = Vec::new();
        for tracker in trackers.iter_mut() {
            for (sender, sealed) in &contributions {
                if let Some(sealed) = sealed.get(&tracker.me) {
                    tracker.receive_contribution(*sender, sealed.clone());
                }
            }
            rebuilt.push(tracker.rebuild(&keys[tracker.me as usize].decryption).unwrap());
        }
        assert_eq!(rebuilt[0], Some(shares[0]));
        assert!(rebuilt[1..].iter().all(Option::is_none));
    }
}
