//! Lock-step orchestration of every shareholder.
//!
//! Each phase is invoked on every shareholder, after which every shareholder handles everything
//! delivered to it before the next phase begins. This is enough to reason about the protocol (and
//! to test it end-to-end) without a network.
//!
//! A shareholder whose phase fails sits out the rest of the run; its failure is recorded in the
//! [Report].

use crate::{
    clock::Clock,
    primitives::{self, group::Group, lagrange},
    relay::Relay,
    shareholder::{self, Shareholder},
    tracker,
};
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur when coordinating shareholders.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no majority view")]
    NoMajority,
    #[error("not enough derivations: {0} < {1}")]
    NotEnoughDerivations(usize, u32),
    #[error("primitives: {0}")]
    Primitives(#[from] primitives::Error),
}

/// Outcome of a run across every shareholder.
#[derive(Debug, Default)]
pub struct Report {
    pub epoch: u64,

    /// The first failure of each shareholder that failed.
    pub failures: BTreeMap<u32, shareholder::Error>,

    /// The parties each shareholder excluded, marked corrupt, or found malfunctioning.
    pub flagged: BTreeMap<u32, BTreeSet<u32>>,
}

impl Report {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }

    /// Returns whether every shareholder completed the run.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the parties flagged by `index`.
    pub fn flagged_by(&self, index: u32) -> BTreeSet<u32> {
        self.flagged.get(&index).cloned().unwrap_or_default()
    }
}

/// Drives every shareholder through each protocol.
pub struct Coordinator<G: Group> {
    group: G,
    threshold: u32,
    clock: Clock,
    relay: Relay,
    shareholders: Vec<Shareholder<G>>,
}

impl<G: Group> Coordinator<G> {
    pub fn new(
        group: G,
        threshold: u32,
        clock: Clock,
        relay: Relay,
        shareholders: Vec<Shareholder<G>>,
    ) -> Self {
        Self {
            group,
            threshold,
            clock,
            relay,
            shareholders,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.clock.epoch()
    }

    pub fn shareholders(&self) -> &[Shareholder<G>] {
        &self.shareholders
    }

    pub fn shareholder(&self, index: u32) -> Option<&Shareholder<G>> {
        self.shareholders.get(index as usize)
    }

    pub fn shareholder_mut(&mut self, index: u32) -> Option<&mut Shareholder<G>> {
        self.shareholders.get_mut(index as usize)
    }

    /// Delivers everything sent so far.
    fn deliver(&mut self) {
        for shareholder in self.shareholders.iter_mut() {
            shareholder.drain();
        }
    }

    /// Runs a phase on every shareholder that has not failed yet, then delivers.
    fn step<F>(&mut self, report: &mut Report, mut phase: F)
    where
        F: FnMut(&mut Shareholder<G>) -> Result<(), shareholder::Error>,
    {
        self.step_flagging(report, |shareholder| {
            phase(shareholder)?;
            Ok(BTreeSet::new())
        });
    }

    /// Like [Coordinator::step], recording the parties each shareholder flags.
    fn step_flagging<F>(&mut self, report: &mut Report, mut phase: F)
    where
        F: FnMut(&mut Shareholder<G>) -> Result<BTreeSet<u32>, shareholder::Error>,
    {
        for shareholder in self.shareholders.iter_mut() {
            let index = shareholder.index();
            if report.failures.contains_key(&index) {
                continue;
            }
            match phase(shareholder) {
                Ok(flagged) => {
                    if !flagged.is_empty() {
                        report.flagged.entry(index).or_default().extend(flagged);
                    }
                }
                Err(err) => {
                    warn!(index, epoch = report.epoch, ?err, "phase failed");
                    report.failures.insert(index, err);
                }
            }
        }
        self.deliver();
    }

    /// Runs distributed key generation in the current epoch.
    pub fn generate<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Report {
        let mut report = Report::new(self.clock.epoch());
        self.step(&mut report, |s| s.deal_generation(rng));
        self.step(&mut report, |s| s.verify_generation());
        self.step(&mut report, |s| s.accuse_generation());
        self.step(&mut report, |s| s.rebut_generation());
        self.step_flagging(&mut report, |s| s.process_generation());
        self.step(&mut report, |s| s.generate_share().map(|_| ()));
        self.step(&mut report, |s| s.prove_share(rng));
        self.step(&mut report, |s| s.compute_public_keys());
        info!(epoch = report.epoch, failures = report.failures.len(), "generation complete");
        report
    }

    /// Moves to a new epoch and refreshes every share.
    pub fn refresh<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Report {
        let mut report = Report::new(self.clock.advance());
        self.step(&mut report, |s| s.deal_refresh(rng));
        self.step(&mut report, |s| s.verify_refresh());
        self.step(&mut report, |s| s.accuse_refresh());
        self.step(&mut report, |s| s.rebut_refresh());
        self.step_flagging(&mut report, |s| s.process_refresh());
        self.step(&mut report, |s| s.perform_update());
        info!(epoch = report.epoch, failures = report.failures.len(), "refresh complete");
        report
    }

    /// Moves to a new epoch and replaces every shareholder's keys.
    pub fn rekey<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Report {
        let mut report = Report::new(self.clock.advance());
        self.step(&mut report, |s| s.rekey(rng));
        self.step_flagging(&mut report, |s| s.identify_malfunctions());
        info!(epoch = report.epoch, failures = report.failures.len(), "rekey complete");
        report
    }

    /// Moves to a new epoch, detects corrupted shares and rebuilds them.
    ///
    /// Fails if any shareholder finds no majority view, which cannot be recovered from.
    pub fn detect_and_reconstruct<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Report, Error> {
        let mut report = Report::new(self.clock.advance());
        self.step(&mut report, |s| s.send_view());
        self.step_flagging(&mut report, |s| s.count_votes());
        let no_majority = report.failures.values().any(|err| {
            matches!(
                err,
                shareholder::Error::Tracker(tracker::Error::NoMajority)
            )
        });
        if no_majority {
            warn!(epoch = report.epoch, "no majority view");
            return Err(Error::NoMajority);
        }
        self.step(&mut report, |s| s.deal_reconstruction(rng));
        self.step(&mut report, |s| s.verify_reconstruction());
        self.step(&mut report, |s| s.accuse_reconstruction());
        self.step(&mut report, |s| s.rebut_reconstruction());
        self.step_flagging(&mut report, |s| {
            let excluded = s.process_reconstruction()?;
            Ok(excluded.into_values().flatten().collect())
        });
        self.step(&mut report, |s| s.contribute(rng));
        self.step(&mut report, |s| s.rebuild());
        info!(epoch = report.epoch, failures = report.failures.len(), "reconstruction complete");
        Ok(report)
    }

    /// Runs one full update: rekey, then detection and reconstruction, then refresh.
    pub fn update<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Report>, Error> {
        let rekey = self.rekey(rng);
        let reconstruction = self.detect_and_reconstruct(rng)?;
        let refresh = self.refresh(rng);
        Ok(vec![rekey, reconstruction, refresh])
    }

    /// Evaluates the threshold function on `input`: hashes it to the group and raises the
    /// result to the shared secret, interpolating `threshold` derivations in the exponent.
    pub fn derive(&self, input: &[u8]) -> Result<G::Element, Error> {
        let point = self.group.hash_to_curve(input);
        let derivations = self
            .shareholders
            .iter()
            .filter_map(|shareholder| shareholder.derive(&point).ok())
            .collect::<Vec<_>>();
        if derivations.len() < self.threshold as usize {
            return Err(Error::NotEnoughDerivations(
                derivations.len(),
                self.threshold,
            ));
        }
        Ok(lagrange::interpolate_exponents(
            &derivations,
            self.threshold,
            0,
        )?)
    }

    /// Stops every shareholder's consumer loop.
    pub fn stop(&self) {
        self.relay.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        administration::Administration,
        config::Config,
        primitives::{group::P256, lagrange::interpolate_complete},
        shareholder::{
            behavior::{Behavior, Operation},
            mocks,
        },
    };
    use commonware_macros::test_traced;
    use rand::{rngs::StdRng, SeedableRng};
    use test_case::test_case;

    fn config(n: u32, threshold: u32, update_threshold: u32) -> Config {
        Config {
            n,
            threshold,
            update_threshold,
            seed: None,
            log_level: "debug".to_string(),
        }
    }

    fn coordinator(
        n: u32,
        t: u32,
        behaviors: Vec<(u32, Box<dyn Behavior<P256>>)>,
    ) -> (StdRng, Coordinator<P256>) {
        let mut rng = StdRng::seed_from_u64(n as u64);
        let mut administration = Administration::new(P256::new(), config(n, t, t)).unwrap();
        for (index, behavior) in behaviors {
            administration = administration.behavior(index, behavior);
        }
        let coordinator = administration.bootstrap(&mut rng);
        (rng, coordinator)
    }

    fn set(indices: &[u32]) -> BTreeSet<u32> {
        indices.iter().copied().collect()
    }

    fn secret(coordinator: &Coordinator<P256>, t: u32) -> p256::Scalar {
        let evals = coordinator
            .shareholders()
            .iter()
            .filter_map(|s| s.share().map(|share| share.eval()))
            .collect::<Vec<_>>();
        interpolate_complete(&evals, t, 0).unwrap()
    }

    #[test_case(3, 2)]
    #[test_case(4, 4)]
    #[test_case(5, 3)]
    #[test_case(7, 5)]
    fn test_generate(n: u32, t: u32) {
        let (mut rng, mut coordinator) = coordinator(n, t, Vec::new());
        let report = coordinator.generate(&mut rng);
        assert!(report.is_clean());
        assert!(report.flagged.is_empty());

        // Everyone agrees on the public keys, which match the shared secret
        let public = coordinator.shareholder(0).unwrap().public_keys().unwrap().clone();
        for shareholder in coordinator.shareholders() {
            assert_eq!(shareholder.public_keys(), Some(&public));
        }
        let group = P256::new();
        assert_eq!(group.exp(&secret(&coordinator, t)), public.secret);

        // Derivation matches the secret
        let derived = coordinator.derive(b"input").unwrap();
        let expected = group.multiply(&group.hash_to_curve(b"input"), &secret(&coordinator, t));
        assert_eq!(derived, expected);
    }

    #[test_traced]
    fn test_refresh_preserves_secret() {
        let (mut rng, mut coordinator) = coordinator(5, 3, Vec::new());
        assert!(coordinator.generate(&mut rng).is_clean());
        let before = coordinator.derive(b"input").unwrap();
        let shares = coordinator
            .shareholders()
            .iter()
            .map(|s| *s.share().unwrap())
            .collect::<Vec<_>>();
        let secret_before = secret(&coordinator, 3);

        let report = coordinator.refresh(&mut rng);
        assert!(report.is_clean());
        assert_eq!(report.epoch, 1);
        for (shareholder, old) in coordinator.shareholders().iter().zip(&shares) {
            assert_ne!(shareholder.share().unwrap(), old);
        }
        assert_eq!(secret(&coordinator, 3), secret_before);
        assert_eq!(coordinator.derive(b"input").unwrap(), before);
    }

    #[test_traced]
    fn test_reconstruct_erased_share() {
        let (mut rng, mut coordinator) = coordinator(5, 3, Vec::new());
        assert!(coordinator.generate(&mut rng).is_clean());
        let lost = *coordinator.shareholder(2).unwrap().share().unwrap();
        let before = coordinator.derive(b"input").unwrap();

        coordinator.shareholder_mut(2).unwrap().erase_share();
        let report = coordinator.detect_and_reconstruct(&mut rng).unwrap();
        assert!(report.is_clean());
        for index in 0..5 {
            assert_eq!(report.flagged_by(index), set(&[2]));
        }
        assert_eq!(coordinator.shareholder(2).unwrap().share(), Some(&lost));
        assert_eq!(coordinator.derive(b"input").unwrap(), before);
    }

    #[test_traced]
    fn test_update_rounds() {
        let (mut rng, mut coordinator) = coordinator(7, 4, Vec::new());
        assert!(coordinator.generate(&mut rng).is_clean());
        let before = coordinator.derive(b"input").unwrap();
        for round in 0..3 {
            coordinator.shareholder_mut(round).unwrap().erase_share();
            let reports = coordinator.update(&mut rng).unwrap();
            assert!(reports.iter().all(Report::is_clean));
            assert_eq!(coordinator.derive(b"input").unwrap(), before);
        }
        assert_eq!(coordinator.epoch(), 9);
    }

    #[test_traced]
    fn test_corrupt_dealer_excluded() {
        let behavior = mocks::CorruptDealer {
            operation: Operation::Generation,
            victims: set(&[0]),
        };
        let (mut rng, mut coordinator) = coordinator(5, 3, vec![(4, Box::new(behavior))]);
        let report = coordinator.generate(&mut rng);
        assert!(report.is_clean());
        for index in 0..5 {
            assert_eq!(report.flagged_by(index), set(&[4]));
        }
        let group = P256::new();
        let public = coordinator.shareholder(0).unwrap().public_keys().unwrap();
        assert_eq!(group.exp(&secret(&coordinator, 3)), public.secret);
    }

    #[test_traced]
    fn test_lazy_dealer_excluded_from_refresh() {
        let behavior = mocks::LazyDealer {
            operation: Operation::Refresh,
            victims: set(&[1, 2]),
        };
        let (mut rng, mut coordinator) = coordinator(5, 3, vec![(0, Box::new(behavior))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        let before = coordinator.derive(b"input").unwrap();

        let report = coordinator.refresh(&mut rng);
        assert!(report.is_clean());
        for index in 0..5 {
            assert_eq!(report.flagged_by(index), set(&[0]));
        }
        assert_eq!(coordinator.derive(b"input").unwrap(), before);
    }

    #[test_traced]
    fn test_forging_accuser_excluded() {
        let behavior = mocks::ForgingAccuser {
            operation: Operation::Refresh,
            accused: set(&[3]),
        };
        let (mut rng, mut coordinator) = coordinator(5, 3, vec![(1, Box::new(behavior))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        let before = coordinator.derive(b"input").unwrap();

        let report = coordinator.refresh(&mut rng);
        assert!(report.is_clean());
        for index in 0..5 {
            assert_eq!(report.flagged_by(index), set(&[1]));
        }
        assert_eq!(coordinator.derive(b"input").unwrap(), before);
    }

    #[test_traced]
    fn test_mute_dealer_repaired() {
        let behavior = mocks::Mute {
            operation: Operation::Refresh,
        };
        let (mut rng, mut coordinator) = coordinator(4, 2, vec![(3, Box::new(behavior))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        let before = coordinator.derive(b"input").unwrap();

        // Nobody accuses an absent dealer, but the muted party applies its own dealing
        let report = coordinator.refresh(&mut rng);
        assert!(report.is_clean());
        assert!(report.flagged.is_empty());
        assert_eq!(coordinator.derive(b"input").unwrap(), before);

        // Its diverged share is detected and rebuilt
        let report = coordinator.detect_and_reconstruct(&mut rng).unwrap();
        assert!(report.is_clean());
        for index in 0..4 {
            assert_eq!(report.flagged_by(index), set(&[3]));
        }
        let evals = |indices: &[u32]| {
            indices
                .iter()
                .map(|i| coordinator.shareholder(*i).unwrap().share().unwrap().eval())
                .collect::<Vec<_>>()
        };
        assert_eq!(
            interpolate_complete(&evals(&[2, 3]), 2, 0).unwrap(),
            interpolate_complete(&evals(&[0, 1]), 2, 0).unwrap()
        );
    }

    #[test_traced]
    fn test_corrupt_dealer_excluded_from_reconstruction() {
        let behavior = mocks::CorruptDealer {
            operation: Operation::Reconstruction,
            victims: set(&[1]),
        };
        let (mut rng, mut coordinator) = coordinator(5, 3, vec![(0, Box::new(behavior))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        let lost = *coordinator.shareholder(4).unwrap().share().unwrap();

        coordinator.shareholder_mut(4).unwrap().erase_share();
        let report = coordinator.detect_and_reconstruct(&mut rng).unwrap();
        assert!(report.is_clean());
        for index in 1..5 {
            assert_eq!(report.flagged_by(index), set(&[0, 4]));
        }
        assert_eq!(coordinator.shareholder(4).unwrap().share(), Some(&lost));
    }

    #[test_traced]
    fn test_corrupt_contributor_skipped() {
        let (mut rng, mut coordinator) =
            coordinator(5, 3, vec![(0, Box::new(mocks::CorruptContributor))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        let lost = *coordinator.shareholder(4).unwrap().share().unwrap();

        coordinator.shareholder_mut(4).unwrap().erase_share();
        let report = coordinator.detect_and_reconstruct(&mut rng).unwrap();
        assert!(report.is_clean());
        assert_eq!(coordinator.shareholder(4).unwrap().share(), Some(&lost));
    }

    #[test_traced]
    fn test_rekey() {
        let (mut rng, mut coordinator) =
            coordinator(4, 2, vec![(2, Box::new(mocks::IdenticalKeys))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        let old = coordinator.shareholder(0).unwrap().book().clone();

        let report = coordinator.rekey(&mut rng);
        assert!(report.is_clean());
        for index in 0..4 {
            assert_eq!(report.flagged_by(index), set(&[2]));
        }
        let book = coordinator.shareholder(0).unwrap().book();
        for index in 0..4 {
            if index == 2 {
                assert_eq!(book.get(index), old.get(index));
            } else {
                assert_ne!(book.get(index), old.get(index));
            }
        }

        // Messages signed with the new keys are accepted
        assert!(coordinator.refresh(&mut rng).is_clean());
    }

    #[test_traced]
    fn test_mute_rekeyer_keeps_keys() {
        let behavior = mocks::Mute {
            operation: Operation::Rekey,
        };
        let (mut rng, mut coordinator) = coordinator(5, 3, vec![(4, Box::new(behavior))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        let old = coordinator.shareholder(0).unwrap().book().clone();

        let report = coordinator.rekey(&mut rng);
        assert!(report.is_clean());
        for index in 0..5 {
            assert_eq!(report.flagged_by(index), set(&[4]));
        }

        // Everyone (the muted party included) keeps its old keys on file
        let own = coordinator.shareholder(4).unwrap().book().get(4).cloned();
        assert_eq!(own.as_ref(), old.get(4));
        for index in 0..5 {
            let book = coordinator.shareholder(index).unwrap().book();
            assert_eq!(book.get(4), own.as_ref());
        }

        // Its messages still verify and its fragments still open
        let report = coordinator.refresh(&mut rng);
        assert!(report.is_clean());
        assert!(report.flagged.is_empty());
    }

    #[test_traced]
    fn test_no_majority() {
        let group = P256::new();
        let skewed = |index| -> Box<dyn Behavior<P256>> {
            Box::new(mocks::SkewedView { group, index })
        };
        let (mut rng, mut coordinator) = coordinator(4, 2, vec![(2, skewed(0)), (3, skewed(0))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        assert!(matches!(
            coordinator.detect_and_reconstruct(&mut rng),
            Err(Error::NoMajority)
        ));
    }

    #[test_traced]
    fn test_skewed_minority_rebuilt() {
        let group = P256::new();
        let (mut rng, mut coordinator) =
            coordinator(5, 3, vec![(1, Box::new(mocks::SkewedView { group, index: 0 }))]);
        assert!(coordinator.generate(&mut rng).is_clean());
        let share = *coordinator.shareholder(1).unwrap().share().unwrap();

        // The skewed party is rebuilt (to the share it already had)
        let report = coordinator.detect_and_reconstruct(&mut rng).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.flagged_by(0), set(&[1]));
        assert_eq!(coordinator.shareholder(1).unwrap().share(), Some(&share));
    }

    #[test_traced]
    fn test_not_enough_derivations() {
        let (mut rng, mut coordinator) = coordinator(3, 2, Vec::new());
        assert!(coordinator.generate(&mut rng).is_clean());
        coordinator.shareholder_mut(0).unwrap().erase_share();
        coordinator.shareholder_mut(1).unwrap().erase_share();
        assert!(matches!(
            coordinator.derive(b"input"),
            Err(Error::NotEnoughDerivations(1, 2))
        ));
    }
}
