//! Dynamic rekeying.
//!
//! Every shareholder generates fresh signing and encryption keys and broadcasts the public
//! halves (signed with its current key). Once every announcement is in, each shareholder
//! classifies its peers and applies the valid announcements to its key book.
//!
//! A shareholder's own announcement is only recorded once it comes back from the relay, so the
//! new key pair takes effect exactly when every peer that saw the same broadcast switches to it.

use crate::{
    identity::{KeyBook, KeyPair, PeerKeys, PublicKey},
    primitives::group::Group,
    tracker::{ensure, Error, Reason},
};
use commonware_codec::{DecodeExt, Encode};
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

const TRACKER: &str = "rekey";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Init,
    SentRekey,
    IdentifiedErrors,
}

/// Raw public keys announced by a shareholder.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Announcement {
    verifier: Vec<u8>,
    encryption: Vec<u8>,
}

/// Tracks a single rekey run.
#[derive(Clone, Debug)]
pub struct Rekey<G: Group> {
    group: G,
    me: u32,
    n: u32,
    epoch: u64,
    state: State,

    pending: Option<KeyPair<G>>,
    announcements: BTreeMap<u32, Announcement>,
    duplicates: BTreeSet<u32>,
}

impl<G: Group> Rekey<G> {
    pub fn new(group: G, me: u32, n: u32, epoch: u64) -> Self {
        Self {
            group,
            me,
            n,
            epoch,
            state: State::Init,
            pending: None,
            announcements: BTreeMap::new(),
            duplicates: BTreeSet::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Generates a fresh key pair and returns the encoded public halves to broadcast.
    pub fn rekey<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        tamper: impl FnOnce(&mut Vec<u8>, &mut Vec<u8>),
    ) -> Result<(Vec<u8>, Vec<u8>), Error> {
        ensure(TRACKER, &self.state, &[State::Init])?;
        let keys = KeyPair::new(&self.group, rng);
        let mut verifier = keys.signer.public_key().encode().to_vec();
        let mut encryption = self.group.encode(&keys.encryption);
        tamper(&mut verifier, &mut encryption);
        self.pending = Some(keys);
        self.state = State::SentRekey;
        Ok((verifier, encryption))
    }

    /// Records the announcement broadcast by `sender` (including our own).
    pub fn receive(&mut self, sender: u32, verifier: Vec<u8>, encryption: Vec<u8>) {
        if self.state > State::SentRekey {
            warn!(me = self.me, sender, "ignoring late rekey");
            return;
        }
        if self.announcements.contains_key(&sender) {
            warn!(me = self.me, sender, reason = ?Reason::Duplicate, "rejecting rekey");
            self.duplicates.insert(sender);
            return;
        }
        self.announcements.insert(
            sender,
            Announcement {
                verifier,
                encryption,
            },
        );
    }

    /// Checks an announcement, returning the keys it carries.
    fn check(&self, announcement: &Announcement) -> Result<PeerKeys<G>, Reason> {
        if announcement.verifier == announcement.encryption {
            return Err(Reason::IdenticalKeys);
        }
        let verifier =
            PublicKey::decode(&announcement.verifier[..]).map_err(|_| Reason::Malformed)?;
        let encryption = self
            .group
            .decode(&announcement.encryption)
            .ok_or(Reason::Malformed)?;
        if encryption == self.group.identity() {
            return Err(Reason::Malformed);
        }
        Ok(PeerKeys {
            verifier,
            encryption,
        })
    }

    /// Flags every malfunctioning shareholder and applies every other announcement to `book`.
    ///
    /// Returns the malfunctioning shareholders and, if our own announcement was delivered and
    /// accepted, the key pair to switch to.
    pub fn identify(
        &mut self,
        book: &mut KeyBook<G>,
    ) -> Result<(BTreeSet<u32>, Option<KeyPair<G>>), Error> {
        ensure(TRACKER, &self.state, &[State::SentRekey])?;
        let mut malfunctioning = BTreeSet::new();
        let mut own = None;
        for index in 0..self.n {
            if self.duplicates.contains(&index) {
                malfunctioning.insert(index);
                continue;
            }
            let Some(announcement) = self.announcements.get(&index) else {
                warn!(me = self.me, index, reason = ?Reason::Absent, "malfunctioning");
                malfunctioning.insert(index);
                continue;
            };
            match self.check(announcement) {
                Ok(keys) => {
                    book.update(index, keys)?;
                    if index == self.me {
                        own = self.pending.take();
                    }
                }
                Err(reason) => {
                    warn!(me = self.me, index, ?reason, "malfunctioning");
                    malfunctioning.insert(index);
                }
            }
        }
        self.announcements.clear();
        self.pending = None;
        self.state = State::IdentifiedErrors;
        info!(me = self.me, epoch = self.epoch, malfunctioning = ?malfunctioning, "rekeyed");
        Ok((malfunctioning, own))
    }
}
