//! Proof that a published `g^s` is the `g`-component of a Pedersen commitment evaluation.
//!
//! After generation, each shareholder holds `(s, s')` with `g^s h^{s'} = C(x)` for the combined
//! Pedersen commitment polynomial `C`. To reveal its share public key `a = g^s` without revealing
//! `s`, the shareholder also reveals `b = h^{s'}` and proves knowledge of both discrete logs with
//! two Schnorr proofs bound by a single Fiat-Shamir challenge. A verifier then checks
//! `a + b == C(x)`, which is only possible if `a` is honest (nobody knows `log_g h`).

use crate::primitives::{
    group::{
        element_size, read_element, read_scalar, scalar_size, write_element, write_scalar, Group,
    },
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, Read, Write};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

/// Namespace used to domain-separate proof challenges.
const PROOF_NAMESPACE: &[u8] = b"_COMMONWARE_PROSS_PEDERSEN_SPLIT";

/// A Pedersen split proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof<G: Group> {
    /// `g^s`
    pub a: G::Element,
    /// `h^{s'}`
    pub b: G::Element,
    pub challenge: G::Scalar,
    pub response_a: G::Scalar,
    pub response_b: G::Scalar,
}

fn challenge<G: Group>(
    group: &G,
    a: &G::Element,
    b: &G::Element,
    commitment: &G::Element,
    nonce_a: &G::Element,
    nonce_b: &G::Element,
) -> G::Scalar {
    let mut hasher = Sha256::new();
    hasher.update(PROOF_NAMESPACE);
    for point in [
        &group.generator(),
        &group.pedersen(),
        a,
        b,
        commitment,
        nonce_a,
        nonce_b,
    ] {
        hasher.update(group.encode(point));
    }
    group.reduce(&hasher.finalize())
}

/// Proves knowledge of `(secret, blinding)` such that `g^secret h^blinding == commitment`.
pub fn prove<G: Group, R: RngCore + CryptoRng>(
    group: &G,
    rng: &mut R,
    secret: &G::Scalar,
    blinding: &G::Scalar,
    commitment: &G::Element,
) -> Proof<G> {
    let h = group.pedersen();
    let a = group.exp(secret);
    let b = group.multiply(&h, blinding);

    // Commit to nonces
    let r_a = group.random_scalar(rng);
    let r_b = group.random_scalar(rng);
    let nonce_a = group.exp(&r_a);
    let nonce_b = group.multiply(&h, &r_b);

    // Respond to challenge
    let c = challenge(group, &a, &b, commitment, &nonce_a, &nonce_b);
    Proof {
        a,
        b,
        challenge: c,
        response_a: r_a - c * secret,
        response_b: r_b - c * blinding,
    }
}

/// Verifies a Pedersen split proof against the expected commitment evaluation.
pub fn verify<G: Group>(group: &G, proof: &Proof<G>, commitment: &G::Element) -> Result<(), Error> {
    // Ensure the split adds up to the commitment
    if group.add(&proof.a, &proof.b) != *commitment {
        return Err(Error::InvalidProof);
    }

    // Recompute nonces
    let nonce_a = group.add(
        &group.exp(&proof.response_a),
        &group.multiply(&proof.a, &proof.challenge),
    );
    let nonce_b = group.add(
        &group.multiply(&group.pedersen(), &proof.response_b),
        &group.multiply(&proof.b, &proof.challenge),
    );

    // Ensure challenge matches
    let c = challenge(group, &proof.a, &proof.b, commitment, &nonce_a, &nonce_b);
    if c != proof.challenge {
        return Err(Error::InvalidProof);
    }
    Ok(())
}

impl<G: Group> Write for Proof<G> {
    fn write(&self, buf: &mut impl BufMut) {
        write_element(&self.a, buf);
        write_element(&self.b, buf);
        write_scalar(&self.challenge, buf);
        write_scalar(&self.response_a, buf);
        write_scalar(&self.response_b, buf);
    }
}

impl<G: Group> Read for Proof<G> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            a: read_element(buf)?,
            b: read_element(buf)?,
            challenge: read_scalar(buf)?,
            response_a: read_scalar(buf)?,
            response_b: read_scalar(buf)?,
        })
    }
}

impl<G: Group> EncodeSize for Proof<G> {
    fn encode_size(&self) -> usize {
        2 * element_size::<G::Element>() + 3 * scalar_size::<G::Scalar>()
    }
}
