//! Verifiable secret sharing over a prime-order group.
//!
//! # Overview
//!
//! Every protocol run in this crate (generation, refresh, reconstruction) is built from the
//! same handful of operations:
//!
//! - Sample a degree `t-1` polynomial, either uniformly at random ([poly::new_from]) or such
//!   that it vanishes at a chosen x-coordinate ([poly::new_masking]).
//! - Hand out evaluations at `x = index + 1` as [shamir::Share]s and publish Feldman (`g^{a_i}`)
//!   or Pedersen (`g^{a_i} h^{b_i}`) commitments to the coefficients.
//! - Check a share against published commitments ([shamir::verify_share]).
//! - Recover a value at any x-coordinate from `t` evaluations, either in the field or in
//!   the exponent ([lagrange]), or recover the full coefficient vector by inverting a
//!   Vandermonde matrix ([matrix]).
//!
//! All functions are generic over [group::Group] so callers pick the curve at construction time.
//!
//! # Example
//!
//! ```rust
//! use commonware_pross::primitives::{group::{Group, P256}, lagrange, poly, shamir};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let group = P256::new();
//! let mut rng = StdRng::seed_from_u64(0);
//! let (n, t) = (5, 3);
//!
//! // Share a secret
//! let secret = poly::new_from::<<P256 as Group>::Scalar, _>(t - 1, &mut rng);
//! let commitment = shamir::feldman(&group, &secret);
//! let shares = shamir::generate_shares(&secret, n);
//!
//! // Verify each share
//! for share in &shares {
//!     shamir::verify_share(&group, share, &commitment).expect("share should be valid");
//! }
//!
//! // Recover the secret from any `t` shares
//! let evals = shares.iter().skip(2).map(|s| s.eval()).collect::<Vec<_>>();
//! let recovered = lagrange::interpolate_complete(&evals, t, 0).unwrap();
//! assert_eq!(&recovered, secret.constant());
//! ```

pub mod group;
pub mod lagrange;
pub mod matrix;
pub mod poly;
pub mod shamir;
pub mod zkp;

use thiserror::Error;

/// Errors that can occur when working with secret sharing primitives.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("not enough evaluations: {0}/{1}")]
    NotEnoughEvaluations(usize, usize),
    #[error("no inverse")]
    NoInverse,
    #[error("duplicate polynomial evaluation point")]
    DuplicateEval,
    #[error("singular matrix")]
    SingularMatrix,
    #[error("share does not match commitment")]
    ShareWrongCommitment,
    #[error("share index out of range")]
    ShareIndexOutOfRange,
    #[error("invalid proof")]
    InvalidProof,
}
