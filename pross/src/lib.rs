//! Proactively refresh, repair, and rekey a threshold-shared secret.
//!
//! A secret `s` is shared among `n` shareholders such that any `t` shares recover it (and any
//! `t-1` reveal nothing). The secret is never assembled: shareholders generate it jointly, use it
//! only to evaluate `H(x)^s` in the exponent, and periodically move to a new epoch in which they:
//!
//! 1. Replace their signing and encryption keys ([tracker::rekey]).
//! 2. Agree on the share public key of every shareholder, marking anyone whose share disagrees
//!    with the majority as corrupt, and rebuild the shares of corrupt shareholders from the rest
//!    ([tracker::reconstruction]).
//! 3. Re-randomize every share without changing the secret ([tracker::refresh]).
//!
//! An adversary that compromises fewer than `t` shareholders per epoch never learns the secret,
//! even if it eventually compromises every shareholder across epochs.
//!
//! Every step is a verifiable secret sharing round ([tracker::vss]) in which dealers seal one
//! fragment per recipient ([seal]), recipients accuse dealers whose fragments do not match the
//! published commitment, and dealers rebut accusations by disclosing the evidence needed to
//! open the disputed fragment publicly ([tracker::dispute]).
//!
//! # Status
//!
//! `commonware-pross` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.
//!
//! # Example
//!
//! ```rust
//! use commonware_pross::{
//!     administration::Administration, config::Config, primitives::group::P256,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let config = Config {
//!     n: 4,
//!     threshold: 3,
//!     update_threshold: 3,
//!     seed: None,
//!     log_level: "info".to_string(),
//! };
//! let mut rng = StdRng::seed_from_u64(0);
//! let (mut coordinator, report) = Administration::new(P256::new(), config)
//!     .unwrap()
//!     .launch(&mut rng);
//! assert!(report.is_clean());
//!
//! // Shares change, the derived value does not
//! let before = coordinator.derive(b"hello").unwrap();
//! coordinator.update(&mut rng).unwrap();
//! assert_eq!(coordinator.derive(b"hello").unwrap(), before);
//! ```

pub mod administration;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod identity;
pub mod primitives;
pub mod relay;
pub mod seal;
pub mod shareholder;
pub mod tracker;
pub mod wire;
