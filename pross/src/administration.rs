//! Bootstrap a set of shareholders.
//!
//! The administration is the trusted setup of the simulation: it validates the configuration,
//! generates every shareholder's initial keys, publishes them in a shared [KeyBook], and wires
//! each shareholder to the [Relay] and [Clock]. It never sees the secret, which is generated
//! jointly by the shareholders (see [Coordinator::generate]).

use crate::{
    clock::Clock,
    config::{self, Config},
    coordinator::{Coordinator, Report},
    identity::{KeyBook, KeyPair},
    primitives::group::Group,
    relay::Relay,
    shareholder::{
        self,
        behavior::{Behavior, Honest},
        Shareholder,
    },
};
use rand::{CryptoRng, RngCore};
use std::{collections::BTreeMap, path::Path};
use tracing::{debug, info};

/// Builder for a [Coordinator] and its shareholders.
pub struct Administration<G: Group> {
    group: G,
    config: Config,
    behaviors: BTreeMap<u32, Box<dyn Behavior<G>>>,
}

impl<G: Group> Administration<G> {
    pub fn new(group: G, config: Config) -> Result<Self, config::Error> {
        config.validate()?;
        Ok(Self {
            group,
            config,
            behaviors: BTreeMap::new(),
        })
    }

    /// Loads the configuration from a YAML file.
    pub fn from_file(group: G, path: impl AsRef<Path>) -> Result<Self, config::Error> {
        Self::new(group, Config::load(path)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Overrides the behavior of shareholder `index` (every other shareholder is [Honest]).
    pub fn behavior(mut self, index: u32, behavior: Box<dyn Behavior<G>>) -> Self {
        self.behaviors.insert(index, behavior);
        self
    }

    /// Generates keys and creates every shareholder.
    pub fn bootstrap<R: RngCore + CryptoRng>(mut self, rng: &mut R) -> Coordinator<G> {
        let n = self.config.n;
        let keys = (0..n)
            .map(|_| KeyPair::new(&self.group, rng))
            .collect::<Vec<_>>();
        let book = KeyBook::new(keys.iter().map(KeyPair::public).collect());
        let clock = Clock::new();
        let (relay, inboxes) = Relay::new(n);

        let shareholders = keys
            .into_iter()
            .zip(inboxes)
            .zip(0u32..)
            .map(|((keys, inbox), index)| {
                let behavior = self.behaviors.remove(&index).unwrap_or_else(|| Box::new(Honest));
                debug!(index, ?behavior, "created shareholder");
                Shareholder::new(shareholder::Config {
                    group: self.group.clone(),
                    index,
                    n,
                    threshold: self.config.threshold,
                    update_threshold: self.config.update_threshold,
                    keys,
                    book: book.clone(),
                    clock: clock.clone(),
                    relay: relay.clone(),
                    inbox,
                    behavior,
                })
            })
            .collect::<Vec<_>>();
        info!(
            n,
            threshold = self.config.threshold,
            update_threshold = self.config.update_threshold,
            "bootstrapped shareholders"
        );
        Coordinator::new(self.group, self.config.threshold, clock, relay, shareholders)
    }

    /// Bootstraps the shareholders and runs distributed key generation.
    pub fn launch<R: RngCore + CryptoRng>(self, rng: &mut R) -> (Coordinator<G>, Report) {
        let mut coordinator = self.bootstrap(rng);
        let report = coordinator.generate(rng);
        (coordinator, report)
    }
}
