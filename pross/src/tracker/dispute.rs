//! Public resolution of accusations.
//!
//! Accusations and rebuttals are broadcast, so every honest shareholder records the same
//! ledger and reaches the same decision for each `(accuser, accused)` pair:
//!
//! * If the accused published evidence for the accuser's fragment and the fragment it opens
//!   verifies, the accuser lied and is excluded.
//! * Otherwise (no evidence, or evidence that does not verify), the accused is excluded.

use crate::{primitives::group::Group, seal::Evidence, tracker::Verification};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Accusations, rebuttals and the resulting exclusions for a single protocol run.
#[derive(Clone, Debug)]
pub struct Disputes<G: Group> {
    /// accuser -> accused
    accusations: BTreeMap<u32, BTreeSet<u32>>,
    /// accused -> accuser -> evidence
    rebuttals: BTreeMap<u32, BTreeMap<u32, Evidence<G>>>,
    excluded: BTreeSet<u32>,
}

impl<G: Group> Default for Disputes<G> {
    fn default() -> Self {
        Self {
            accusations: BTreeMap::new(),
            rebuttals: BTreeMap::new(),
            excluded: BTreeSet::new(),
        }
    }
}

impl<G: Group> Disputes<G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the accusations published by `accuser`.
    ///
    /// Only the first set published by an accuser counts. Returns `false` if it was ignored.
    pub fn record_accusations(&mut self, accuser: u32, mut accused: BTreeSet<u32>) -> bool {
        if self.accusations.contains_key(&accuser) {
            debug!(accuser, "ignoring duplicate accusations");
            return false;
        }
        accused.remove(&accuser);
        self.accusations.insert(accuser, accused);
        true
    }

    /// Records the evidence published by `accused`.
    ///
    /// Only the first rebuttal published by an accused party counts. Returns `false` if it
    /// was ignored.
    pub fn record_rebuttal(&mut self, accused: u32, evidence: BTreeMap<u32, Evidence<G>>) -> bool {
        if self.rebuttals.contains_key(&accused) {
            debug!(accused, "ignoring duplicate rebuttal");
            return false;
        }
        self.rebuttals.insert(accused, evidence);
        true
    }

    /// Returns every party that accused `accused`.
    pub fn accusers_of(&self, accused: u32) -> BTreeSet<u32> {
        self.accusations
            .iter()
            .filter(|(_, set)| set.contains(&accused))
            .map(|(accuser, _)| *accuser)
            .collect()
    }

    /// Returns the evidence `accused` published for `accuser`'s fragment (if any).
    pub fn evidence(&self, accused: u32, accuser: u32) -> Option<&Evidence<G>> {
        self.rebuttals.get(&accused)?.get(&accuser)
    }

    /// Excludes a party regardless of any dispute.
    pub fn exclude(&mut self, index: u32) {
        self.excluded.insert(index);
    }

    /// Returns every excluded party.
    pub fn excluded(&self) -> &BTreeSet<u32> {
        &self.excluded
    }

    pub fn is_excluded(&self, index: u32) -> bool {
        self.excluded.contains(&index)
    }

    /// Resolves every recorded accusation with `verify`, which re-checks the accuser's
    /// fragment as opened with the published evidence.
    ///
    /// Returns the full set of excluded parties.
    pub fn resolve<F>(&mut self, mut verify: F) -> &BTreeSet<u32>
    where
        F: FnMut(u32, u32, &Evidence<G>) -> Verification,
    {
        for (accuser, accused) in &self.accusations {
            for accused in accused {
                let evidence = self
                    .rebuttals
                    .get(accused)
                    .and_then(|rebuttal| rebuttal.get(accuser));
                let Some(evidence) = evidence else {
                    warn!(accuser, accused, "accusation upheld: no rebuttal");
                    self.excluded.insert(*accused);
                    continue;
                };
                match verify(*accuser, *accused, evidence) {
                    Verification::Valid(()) => {
                        warn!(accuser, accused, "accusation overturned");
                        self.excluded.insert(*accuser);
                    }
                    outcome => {
                        warn!(accuser, accused, ?outcome, "accusation upheld: invalid rebuttal");
                        self.excluded.insert(*accused);
                    }
                }
            }
        }
        &self.excluded
    }
}
