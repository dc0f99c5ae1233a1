//! A single shareholder: its share, its keys, and the runs it takes part in.
//!
//! Inbound messages arrive through the shareholder's inbox (see [crate::relay]). Each message is
//! decoded, authenticated against the sender's current verifying key, checked against the current
//! epoch, and routed to the run of its protocol family. Phase methods (`deal_*`, `verify_*`, ...)
//! advance the run of the current epoch and broadcast whatever it produces.
//!
//! A shareholder is driven either in lock-step (phase methods interleaved with [Shareholder::drain])
//! or by its own consumer loop ([Shareholder::run]).

pub mod behavior;
#[cfg(test)]
pub mod mocks;

use crate::{
    clock::Clock,
    identity::{self, KeyBook, KeyPair},
    primitives::{
        group::Group,
        poly::Eval,
        shamir::{PublicKeys, Share},
    },
    relay::{Envelope, Relay},
    tracker::{
        self, generation::Generation, reconstruction::Reconstruction, refresh::Refresh,
        rekey::Rekey, Reason,
    },
    wire::{Content, Message, Opcode, Payload, Signed},
};
use behavior::{Behavior, Operation};
use bytes::Bytes;
use commonware_codec::{Decode, Encode};
use futures::{channel::mpsc, StreamExt};
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur when driving a shareholder or handling a message.
#[derive(Error, Debug)]
pub enum Error {
    #[error("tracker: {0}")]
    Tracker(#[from] tracker::Error),
    #[error("identity: {0}")]
    Identity(#[from] identity::Error),
    #[error("decode: {0}")]
    Decode(#[from] commonware_codec::Error),
    #[error("unknown sender: {0}")]
    UnknownSender(u32),
    #[error("invalid signature from {0}")]
    InvalidSignature(u32),
    #[error("stale epoch: expected {expected}, found {found}")]
    StaleEpoch { expected: u64, found: u64 },
    #[error("wrong recipient: {0}")]
    WrongRecipient(u32),
    #[error("missing share")]
    MissingShare,
    #[error("missing public keys")]
    MissingPublicKeys,
}

/// Configuration for a [Shareholder].
pub struct Config<G: Group> {
    pub group: G,

    /// Our index in `0..n`.
    pub index: u32,

    pub n: u32,
    pub threshold: u32,
    pub update_threshold: u32,

    pub keys: KeyPair<G>,
    pub book: KeyBook<G>,
    pub clock: Clock,
    pub relay: Relay,
    pub inbox: mpsc::UnboundedReceiver<Envelope>,
    pub behavior: Box<dyn Behavior<G>>,
}

/// Every run in progress, by epoch.
struct Runs<G: Group> {
    group: G,
    me: u32,
    n: u32,
    t: u32,
    update_threshold: u32,

    generation: BTreeMap<u64, Generation<G>>,
    refresh: BTreeMap<u64, Refresh<G>>,
    reconstruction: BTreeMap<u64, Reconstruction<G>>,
    rekey: BTreeMap<u64, Rekey<G>>,
}

impl<G: Group> Runs<G> {
    /// Drops every run older than `epoch`.
    fn prune(&mut self, epoch: u64) {
        self.generation.retain(|e, _| *e >= epoch);
        self.refresh.retain(|e, _| *e >= epoch);
        self.reconstruction.retain(|e, _| *e >= epoch);
        self.rekey.retain(|e, _| *e >= epoch);
    }

    fn generation(&mut self, epoch: u64) -> &mut Generation<G> {
        self.generation
            .entry(epoch)
            .or_insert_with(|| Generation::new(self.group.clone(), self.me, self.n, self.t, epoch))
    }

    fn refresh(&mut self, epoch: u64) -> &mut Refresh<G> {
        self.refresh.entry(epoch).or_insert_with(|| {
            Refresh::new(
                self.group.clone(),
                self.me,
                self.n,
                self.t,
                self.update_threshold,
                epoch,
            )
        })
    }

    fn reconstruction(&mut self, epoch: u64) -> &mut Reconstruction<G> {
        self.reconstruction.entry(epoch).or_insert_with(|| {
            Reconstruction::new(self.group.clone(), self.me, self.n, self.t, epoch)
        })
    }

    fn rekey(&mut self, epoch: u64) -> &mut Rekey<G> {
        self.rekey
            .entry(epoch)
            .or_insert_with(|| Rekey::new(self.group.clone(), self.me, self.n, epoch))
    }
}

/// A shareholder of the threshold-shared secret.
pub struct Shareholder<G: Group> {
    group: G,
    index: u32,

    keys: KeyPair<G>,
    book: KeyBook<G>,
    clock: Clock,
    relay: Relay,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    behavior: Box<dyn Behavior<G>>,

    share: Option<Share<G::Scalar>>,
    public: Option<PublicKeys<G::Element>>,

    runs: Runs<G>,
}

impl<G: Group> Shareholder<G> {
    pub fn new(cfg: Config<G>) -> Self {
        let runs = Runs {
            group: cfg.group.clone(),
            me: cfg.index,
            n: cfg.n,
            t: cfg.threshold,
            update_threshold: cfg.update_threshold,
            generation: BTreeMap::new(),
            refresh: BTreeMap::new(),
            reconstruction: BTreeMap::new(),
            rekey: BTreeMap::new(),
        };
        Self {
            group: cfg.group,
            index: cfg.index,
            keys: cfg.keys,
            book: cfg.book,
            clock: cfg.clock,
            relay: cfg.relay,
            inbox: cfg.inbox,
            behavior: cfg.behavior,
            share: None,
            public: None,
            runs,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn share(&self) -> Option<&Share<G::Scalar>> {
        self.share.as_ref()
    }

    /// Returns the share public keys of every shareholder (and of the secret).
    pub fn public_keys(&self) -> Option<&PublicKeys<G::Element>> {
        self.public.as_ref()
    }

    pub fn book(&self) -> &KeyBook<G> {
        &self.book
    }

    /// Discards our share (simulating its loss).
    pub fn erase_share(&mut self) {
        if self.share.take().is_some() {
            warn!(me = self.index, "erased share");
        }
    }

    /// Returns `point` raised to our share, for threshold derivation.
    pub fn derive(&self, point: &G::Element) -> Result<Eval<G::Element>, Error> {
        let share = self.share.as_ref().ok_or(Error::MissingShare)?;
        Ok(Eval {
            index: self.index,
            value: self.group.multiply(point, &share.private),
        })
    }

    /// Returns the current epoch (pruning runs from earlier ones).
    fn epoch(&mut self) -> u64 {
        let epoch = self.clock.epoch();
        self.runs.prune(epoch);
        epoch
    }

    fn sign(&self, opcode: Opcode, content: Content<G>) -> Bytes {
        let message = Message {
            sender: self.index,
            epoch: self.clock.epoch(),
            opcode,
            content,
        };
        Signed::sign(&self.keys.signer, message).encode().freeze()
    }

    fn broadcast(&mut self, operation: Operation, opcode: Opcode, content: Content<G>) {
        if self.behavior.mute(operation) {
            debug!(me = self.index, ?opcode, "muted");
            return;
        }
        let message = self.sign(opcode, content);
        self.relay.broadcast(message);
    }

    fn send(&mut self, operation: Operation, recipient: u32, opcode: Opcode, content: Content<G>) {
        if self.behavior.mute(operation) {
            debug!(me = self.index, recipient, ?opcode, "muted");
            return;
        }
        let message = self.sign(opcode, content);
        self.relay.send(recipient, message);
    }

    /// Authenticates a message and routes it to the run it belongs to.
    pub fn handle(&mut self, message: &[u8]) -> Result<(), Error> {
        let signed = Signed::<G>::decode_cfg(message, &(self.runs.n as usize))?;
        let sender = signed.message.sender;
        let verifier = self
            .book
            .verifier(sender)
            .map_err(|_| Error::UnknownSender(sender))?;
        if !signed.verify(verifier) {
            return Err(Error::InvalidSignature(sender));
        }
        let epoch = self.epoch();
        if signed.message.epoch != epoch {
            return Err(Error::StaleEpoch {
                expected: epoch,
                found: signed.message.epoch,
            });
        }
        if let Content::Private { recipient, .. } = &signed.message.content {
            if *recipient != self.index {
                return Err(Error::WrongRecipient(*recipient));
            }
        }
        self.route(sender, epoch, signed.message.opcode, signed.message.content);
        Ok(())
    }

    fn route(&mut self, sender: u32, epoch: u64, opcode: Opcode, content: Content<G>) {
        let runs = &mut self.runs;
        match (opcode, content) {
            // Generation
            (
                Opcode::DkgVss,
                Content::SemiPrivate {
                    public: Payload::Pedersen(commitment),
                    sealed,
                },
            ) => runs.generation(epoch).receive(sender, commitment, sealed),
            (Opcode::DkgVss, _) => runs.generation(epoch).violation(sender, Reason::Malformed),
            (
                Opcode::DkgAccusations,
                Content::Public(Payload::Accusations {
                    target: None,
                    accused,
                }),
            ) => runs.generation(epoch).receive_accusations(sender, accused),
            (
                Opcode::DkgRebuttal,
                Content::Public(Payload::Rebuttal {
                    target: None,
                    evidence,
                }),
            ) => runs.generation(epoch).receive_rebuttal(sender, evidence),
            (Opcode::DkgProof, Content::Public(Payload::Proof(proof))) => {
                runs.generation(epoch).receive_proof(sender, proof)
            }

            // Refresh
            (
                Opcode::RefreshVss,
                Content::SemiPrivate {
                    public: Payload::Feldman(commitment),
                    sealed,
                },
            ) => runs.refresh(epoch).receive(sender, commitment, sealed),
            (Opcode::RefreshVss, _) => runs.refresh(epoch).violation(sender, Reason::Malformed),
            (
                Opcode::RefreshAccusations,
                Content::Public(Payload::Accusations {
                    target: None,
                    accused,
                }),
            ) => runs.refresh(epoch).receive_accusations(sender, accused),
            (
                Opcode::RefreshRebuttal,
                Content::Public(Payload::Rebuttal {
                    target: None,
                    evidence,
                }),
            ) => runs.refresh(epoch).receive_rebuttal(sender, evidence),

            // Detection and reconstruction
            (Opcode::ReconstructionDetect, Content::Public(Payload::View(view))) => {
                runs.reconstruction(epoch).receive_view(sender, view)
            }
            (
                Opcode::ReconstructionVss,
                Content::SemiPrivate {
                    public: Payload::Masking { target, commitment },
                    sealed,
                },
            ) => runs
                .reconstruction(epoch)
                .receive(sender, target, commitment, sealed),
            (
                Opcode::ReconstructionAccusations,
                Content::Public(Payload::Accusations {
                    target: Some(target),
                    accused,
                }),
            ) => runs
                .reconstruction(epoch)
                .receive_accusations(sender, target, accused),
            (
                Opcode::ReconstructionRebuttal,
                Content::Public(Payload::Rebuttal {
                    target: Some(target),
                    evidence,
                }),
            ) => runs
                .reconstruction(epoch)
                .receive_rebuttal(sender, target, evidence),
            (Opcode::ReconstructionContribution, Content::Private { sealed, .. }) => {
                runs.reconstruction(epoch).receive_contribution(sender, sealed)
            }

            // Rekey
            (
                Opcode::Rekey,
                Content::Public(Payload::Rekey {
                    verifier,
                    encryption,
                }),
            ) => runs.rekey(epoch).receive(sender, verifier, encryption),

            (opcode, _) => {
                warn!(
                    me = self.index,
                    sender,
                    ?opcode,
                    reason = ?Reason::Malformed,
                    "dropping message"
                );
            }
        }
    }

    /// Handles every queued message without waiting. Returns `false` if asked to stop.
    pub fn drain(&mut self) -> bool {
        while let Ok(Some(envelope)) = self.inbox.try_next() {
            match envelope {
                Envelope::Deliver(message) => {
                    if let Err(err) = self.handle(&message) {
                        warn!(me = self.index, ?err, "rejected message");
                    }
                }
                Envelope::Stop => return false,
            }
        }
        true
    }

    /// Handles messages as they arrive until asked to stop (or the relay is dropped).
    pub async fn run(&mut self) {
        while let Some(envelope) = self.inbox.next().await {
            match envelope {
                Envelope::Deliver(message) => {
                    if let Err(err) = self.handle(&message) {
                        warn!(me = self.index, ?err, "rejected message");
                    }
                }
                Envelope::Stop => {
                    debug!(me = self.index, "stopping");
                    return;
                }
            }
        }
        debug!(me = self.index, "inbox closed");
    }

    // ---------------------------------------------------------------------
    // Generation
    // ---------------------------------------------------------------------

    pub fn deal_generation<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let (commitment, sealed) = self.runs.generation(epoch).deal(rng, &self.book, |share| {
            behavior.tamper_fragment(Operation::Generation, share)
        })?;
        self.broadcast(
            Operation::Generation,
            Opcode::DkgVss,
            Content::SemiPrivate {
                public: Payload::Pedersen(commitment),
                sealed,
            },
        );
        Ok(())
    }

    pub fn verify_generation(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        self.runs
            .generation(epoch)
            .verify(&self.keys.decryption)?;
        Ok(())
    }

    pub fn accuse_generation(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let accused = self
            .runs
            .generation(epoch)
            .accusations(|accused| behavior.forge_accusations(Operation::Generation, accused))?;
        self.broadcast(
            Operation::Generation,
            Opcode::DkgAccusations,
            Content::Public(Payload::Accusations {
                target: None,
                accused,
            }),
        );
        Ok(())
    }

    pub fn rebut_generation(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let evidence = self.runs.generation(epoch).rebuttal()?;
        if !self.behavior.rebut(Operation::Generation) {
            return Ok(());
        }
        self.broadcast(
            Operation::Generation,
            Opcode::DkgRebuttal,
            Content::Public(Payload::Rebuttal {
                target: None,
                evidence,
            }),
        );
        Ok(())
    }

    /// Resolves disputes, returning every excluded dealer.
    pub fn process_generation(&mut self) -> Result<BTreeSet<u32>, Error> {
        let epoch = self.epoch();
        Ok(self.runs.generation(epoch).process_rebuttals(&self.book)?)
    }

    /// Forms our share, returning the qualified dealers.
    pub fn generate_share(&mut self) -> Result<BTreeSet<u32>, Error> {
        let epoch = self.epoch();
        Ok(self.runs.generation(epoch).generate_share()?)
    }

    pub fn prove_share<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<(), Error> {
        let epoch = self.epoch();
        let proof = self.runs.generation(epoch).prove(rng)?;
        self.broadcast(
            Operation::Generation,
            Opcode::DkgProof,
            Content::Public(Payload::Proof(proof)),
        );
        Ok(())
    }

    /// Computes every share public key and adopts the generated share.
    pub fn compute_public_keys(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let output = self.runs.generation(epoch).finalize()?;
        self.share = Some(output.share);
        self.public = Some(output.public);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Refresh
    // ---------------------------------------------------------------------

    pub fn deal_refresh<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let (commitment, sealed) = self.runs.refresh(epoch).deal(rng, &self.book, |share| {
            behavior.tamper_fragment(Operation::Refresh, share)
        })?;
        self.broadcast(
            Operation::Refresh,
            Opcode::RefreshVss,
            Content::SemiPrivate {
                public: Payload::Feldman(commitment),
                sealed,
            },
        );
        Ok(())
    }

    pub fn verify_refresh(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        self.runs.refresh(epoch).verify(&self.keys.decryption)?;
        Ok(())
    }

    pub fn accuse_refresh(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let accused = self
            .runs
            .refresh(epoch)
            .accusations(|accused| behavior.forge_accusations(Operation::Refresh, accused))?;
        self.broadcast(
            Operation::Refresh,
            Opcode::RefreshAccusations,
            Content::Public(Payload::Accusations {
                target: None,
                accused,
            }),
        );
        Ok(())
    }

    pub fn rebut_refresh(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let evidence = self.runs.refresh(epoch).rebuttal()?;
        if !self.behavior.rebut(Operation::Refresh) {
            return Ok(());
        }
        self.broadcast(
            Operation::Refresh,
            Opcode::RefreshRebuttal,
            Content::Public(Payload::Rebuttal {
                target: None,
                evidence,
            }),
        );
        Ok(())
    }

    pub fn process_refresh(&mut self) -> Result<BTreeSet<u32>, Error> {
        let epoch = self.epoch();
        Ok(self.runs.refresh(epoch).process_rebuttals(&self.book)?)
    }

    /// Adds the qualified fragments to our share and shifts every share public key.
    pub fn perform_update(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let share = self.share.as_ref().ok_or(Error::MissingShare)?;
        let public = self.public.as_ref().ok_or(Error::MissingPublicKeys)?;
        let (share, public) = self.runs.refresh(epoch).update(share, public)?;
        self.share = Some(share);
        self.public = Some(public);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Detection and reconstruction
    // ---------------------------------------------------------------------

    pub fn send_view(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let view = self.runs.reconstruction(epoch).view(
            self.share.as_ref(),
            self.public.as_ref(),
            |view| behavior.tamper_view(view),
        )?;
        self.broadcast(
            Operation::Detection,
            Opcode::ReconstructionDetect,
            Content::Public(Payload::View(view)),
        );
        Ok(())
    }

    /// Tallies views, returning every index marked corrupt.
    pub fn count_votes(&mut self) -> Result<BTreeSet<u32>, Error> {
        let epoch = self.epoch();
        Ok(self.runs.reconstruction(epoch).count_votes()?)
    }

    pub fn deal_reconstruction<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let dealings = self
            .runs
            .reconstruction(epoch)
            .deal(rng, &self.book, |_, share| {
                behavior.tamper_fragment(Operation::Reconstruction, share)
            })?;
        for (target, (commitment, sealed)) in dealings {
            self.broadcast(
                Operation::Reconstruction,
                Opcode::ReconstructionVss,
                Content::SemiPrivate {
                    public: Payload::Masking { target, commitment },
                    sealed,
                },
            );
        }
        Ok(())
    }

    pub fn verify_reconstruction(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        self.runs
            .reconstruction(epoch)
            .verify(&self.keys.decryption)?;
        Ok(())
    }

    pub fn accuse_reconstruction(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let accusations = self
            .runs
            .reconstruction(epoch)
            .accusations(|_, accused| {
                behavior.forge_accusations(Operation::Reconstruction, accused)
            })?;
        for (target, accused) in accusations {
            self.broadcast(
                Operation::Reconstruction,
                Opcode::ReconstructionAccusations,
                Content::Public(Payload::Accusations {
                    target: Some(target),
                    accused,
                }),
            );
        }
        Ok(())
    }

    pub fn rebut_reconstruction(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let rebuttals = self.runs.reconstruction(epoch).rebuttal()?;
        if !self.behavior.rebut(Operation::Reconstruction) {
            return Ok(());
        }
        for (target, evidence) in rebuttals {
            self.broadcast(
                Operation::Reconstruction,
                Opcode::ReconstructionRebuttal,
                Content::Public(Payload::Rebuttal {
                    target: Some(target),
                    evidence,
                }),
            );
        }
        Ok(())
    }

    /// Resolves disputes, returning the exclusions of every instance by target.
    pub fn process_reconstruction(&mut self) -> Result<BTreeMap<u32, BTreeSet<u32>>, Error> {
        let epoch = self.epoch();
        Ok(self
            .runs
            .reconstruction(epoch)
            .process_rebuttals(&self.book)?)
    }

    pub fn contribute<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let contributions = self.runs.reconstruction(epoch).contributions(
            rng,
            &self.book,
            self.share.as_ref(),
            |target, contribution| behavior.tamper_contribution(target, contribution),
        )?;
        for (target, sealed) in contributions {
            self.send(
                Operation::Reconstruction,
                target,
                Opcode::ReconstructionContribution,
                Content::Private {
                    recipient: target,
                    sealed,
                },
            );
        }
        Ok(())
    }

    /// Completes reconstruction, adopting our rebuilt share (if we were corrupt) and the agreed
    /// share public keys.
    pub fn rebuild(&mut self) -> Result<(), Error> {
        let epoch = self.epoch();
        let run = self.runs.reconstruction(epoch);
        let rebuilt = run.rebuild(&self.keys.decryption)?;
        let majority = run.majority().cloned();
        if let Some(share) = rebuilt {
            info!(me = self.index, epoch, "recovered share");
            self.share = Some(share);
        }
        if majority.is_some() {
            self.public = majority;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Rekey
    // ---------------------------------------------------------------------

    pub fn rekey<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<(), Error> {
        let epoch = self.epoch();
        let behavior = &mut self.behavior;
        let (verifier, encryption) = self
            .runs
            .rekey(epoch)
            .rekey(rng, |verifier, encryption| {
                behavior.tamper_keys(verifier, encryption)
            })?;
        self.broadcast(
            Operation::Rekey,
            Opcode::Rekey,
            Content::Public(Payload::Rekey {
                verifier,
                encryption,
            }),
        );
        Ok(())
    }

    /// Applies every valid key announcement, returning the malfunctioning shareholders.
    pub fn identify_malfunctions(&mut self) -> Result<BTreeSet<u32>, Error> {
        let epoch = self.epoch();
        let (malfunctioning, keys) = self.runs.rekey(epoch).identify(&mut self.book)?;
        if let Some(keys) = keys {
            debug!(me = self.index, epoch, "switched keys");
            self.keys = keys;
        }
        Ok(malfunctioning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::group::P256;
    use commonware_cryptography::Signer as _;
    use commonware_macros::test_traced;
    use futures::executor::block_on;
    use rand::{rngs::StdRng, SeedableRng};

    struct Network {
        rng: StdRng,
        clock: Clock,
        relay: Relay,
        keys: Vec<KeyPair<P256>>,
        shareholders: Vec<Shareholder<P256>>,
    }

    fn network(n: u32) -> Network {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let keys = (0..n)
            .map(|_| KeyPair::new(&group, &mut rng))
            .collect::<Vec<_>>();
        let book = KeyBook::new(keys.iter().map(|k| k.public()).collect());
        let clock = Clock::new();
        let (relay, inboxes) = Relay::new(n);
        let shareholders = inboxes
            .into_iter()
            .zip(keys.iter().cloned())
            .enumerate()
            .map(|(index, (inbox, keys))| {
                Shareholder::new(Config {
                    group,
                    index: index as u32,
                    n,
                    threshold: 2,
                    update_threshold: 2,
                    keys,
                    book: book.clone(),
                    clock: clock.clone(),
                    relay: relay.clone(),
                    inbox,
                    behavior: Box::new(behavior::Honest),
                })
            })
            .collect();
        Network {
            rng,
            clock,
            relay,
            keys,
            shareholders,
        }
    }

    fn rekey_message(network: &mut Network, sender: u32, signer: u32, epoch: u64) -> Bytes {
        let group = P256::new();
        let keys = KeyPair::new(&group, &mut network.rng);
        let message = Message {
            sender,
            epoch,
            opcode: Opcode::Rekey,
            content: Content::Public(Payload::Rekey {
                verifier: keys.signer.public_key().encode().to_vec(),
                encryption: group.encode(&keys.encryption),
            }),
        };
        Signed::sign(&network.keys[signer as usize].signer, message)
            .encode()
            .freeze()
    }

    #[test_traced]
    fn test_rejections() {
        let mut network = network(4);
        network.clock.advance();
        let receiver = 0;

        // Start the rekey run
        let mut rng = StdRng::seed_from_u64(1);
        network.shareholders[receiver].rekey(&mut rng).unwrap();
        assert!(network.shareholders[receiver].drain());

        // 1 signs with someone else's key
        let forged = rekey_message(&mut network, 1, 2, 1);
        assert!(matches!(
            network.shareholders[receiver].handle(&forged),
            Err(Error::InvalidSignature(1))
        ));

        // 2 uses a stale epoch
        let stale = rekey_message(&mut network, 2, 2, 0);
        assert!(matches!(
            network.shareholders[receiver].handle(&stale),
            Err(Error::StaleEpoch {
                expected: 1,
                found: 0
            })
        ));

        // Unknown sender and garbage
        let unknown = rekey_message(&mut network, 9, 3, 1);
        assert!(matches!(
            network.shareholders[receiver].handle(&unknown),
            Err(Error::UnknownSender(9))
        ));
        assert!(matches!(
            network.shareholders[receiver].handle(&[1, 2, 3]),
            Err(Error::Decode(_))
        ));

        // Only 3 gets through
        let valid = rekey_message(&mut network, 3, 3, 1);
        network.shareholders[receiver].handle(&valid).unwrap();
        let malfunctioning = network.shareholders[receiver]
            .identify_malfunctions()
            .unwrap();
        assert_eq!(malfunctioning, BTreeSet::from([1, 2]));
    }

    #[test_traced]
    fn test_wrong_recipient() {
        let mut network = network(3);
        let group = P256::new();
        let (sealed, _) = crate::seal::seal(
            &group,
            &mut network.rng,
            &network.keys[2].encryption,
            b"contribution",
        )
        .unwrap();
        let message = Message {
            sender: 1,
            epoch: 0,
            opcode: Opcode::ReconstructionContribution,
            content: Content::Private {
                recipient: 2,
                sealed,
            },
        };
        let message = Signed::sign(&network.keys[1].signer, message).encode();
        assert!(matches!(
            network.shareholders[0].handle(&message),
            Err(Error::WrongRecipient(2))
        ));
    }

    #[test_traced]
    fn test_missing_share() {
        let mut network = network(3);
        let shareholder = &mut network.shareholders[0];
        assert!(matches!(
            shareholder.derive(&P256::new().generator()),
            Err(Error::MissingShare)
        ));
        assert!(matches!(shareholder.perform_update(), Err(Error::MissingShare)));
        assert!(matches!(
            shareholder.verify_refresh(),
            Err(Error::Tracker(tracker::Error::InvalidState { .. }))
        ));
    }

    #[test_traced]
    fn test_run_until_stopped() {
        let mut network = network(3);
        let mut rng = StdRng::seed_from_u64(2);
        for shareholder in network.shareholders.iter_mut() {
            shareholder.rekey(&mut rng).unwrap();
        }
        network.relay.stop();

        // Each consumer handles every announcement before stopping
        for shareholder in network.shareholders.iter_mut() {
            block_on(shareholder.run());
            let malfunctioning = shareholder.identify_malfunctions().unwrap();
            assert!(malfunctioning.is_empty());
        }
        let book = network.shareholders[0].book().clone();
        assert!(network.shareholders.iter().all(|s| s.book() == &book));
    }
}
