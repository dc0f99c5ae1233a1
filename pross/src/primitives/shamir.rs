//! Shamir shares and the Feldman/Pedersen commitments used to verify them.

use crate::primitives::{
    group::{
        element_size, read_element, read_scalar, scalar_size, write_element, write_scalar,
        Element, Group,
    },
    poly::{self, Eval, Poly},
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write};
use p256::elliptic_curve::{ff::PrimeField, group::GroupEncoding};

/// A share of a secret: the evaluation of the sharing polynomial at `x = index + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Share<F> {
    /// The index of the shareholder holding the share.
    pub index: u32,
    /// The share's value (`y`).
    pub private: F,
}

impl<F: PrimeField> Share<F> {
    /// Returns the x-coordinate of the share.
    pub fn x(&self) -> F {
        poly::x(self.index)
    }

    /// Returns the share as a polynomial evaluation.
    pub fn eval(&self) -> Eval<F> {
        Eval {
            index: self.index,
            value: self.private,
        }
    }

    /// Returns the share public key (`g^y`).
    pub fn public<G: Group<Scalar = F>>(&self, group: &G) -> G::Element {
        group.exp(&self.private)
    }
}

/// A share paired with its blinding value under a Pedersen commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PedersenShare<F> {
    pub share: Share<F>,
    pub blinding: F,
}

/// Share public keys for every shareholder, plus the public key of the secret itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeys<E> {
    /// `g^x` for the shared secret `x`.
    pub secret: E,
    /// `g^{s_i}` indexed by shareholder.
    pub shares: Vec<E>,
}

impl<E: Element> PublicKeys<E> {
    /// Derives every share public key (and the secret's public key) from a Feldman commitment.
    pub fn from_commitment(commitment: &Poly<E>, n: u32) -> Self {
        Self {
            secret: *commitment.constant(),
            shares: share_public_keys(commitment, n),
        }
    }

    /// Returns the share public key of a shareholder.
    pub fn get(&self, index: u32) -> Option<&E> {
        self.shares.get(index as usize)
    }

    /// Returns the number of shareholders covered.
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Returns a new set of public keys where each share public key has been shifted by
    /// the evaluation of `commitment` at its index.
    ///
    /// The secret's public key is shifted by the constant term (the identity for a
    /// zero-intercept commitment).
    pub fn updated(&self, commitment: &Poly<E>) -> Self {
        let mut secret = self.secret;
        secret.add(commitment.constant());
        let shares = self
            .shares
            .iter()
            .enumerate()
            .map(|(i, public)| {
                let mut public = *public;
                public.add(&commitment.evaluate(i as u32).value);
                public
            })
            .collect();
        Self { secret, shares }
    }
}

/// Evaluates a private polynomial at `x = 1..=n`.
pub fn generate_shares<F: PrimeField + Element<Scalar = F>>(poly: &Poly<F>, n: u32) -> Vec<Share<F>> {
    (0..n)
        .map(|i| {
            let eval = poly.evaluate(i);
            Share {
                index: eval.index,
                private: eval.value,
            }
        })
        .collect()
}

/// Computes Feldman commitments (`g^{a_i}`) to the coefficients of a private polynomial.
pub fn feldman<G: Group>(group: &G, poly: &Poly<G::Scalar>) -> Poly<G::Element> {
    Poly::commit(poly, group.generator())
}

/// Computes Pedersen commitments (`g^{a_i} h^{b_i}`) to the coefficients of two private
/// polynomials of the same degree.
pub fn pedersen<G: Group>(
    group: &G,
    secret: &Poly<G::Scalar>,
    blinding: &Poly<G::Scalar>,
) -> Poly<G::Element> {
    let mut commitment = Poly::commit(secret, group.generator());
    commitment.add(&Poly::commit(blinding, group.pedersen()));
    commitment
}

/// Computes the share public key of a shareholder from a Feldman commitment.
pub fn share_public_key<E: Element>(commitment: &Poly<E>, index: u32) -> E {
    commitment.evaluate(index).value
}

/// Computes every share public key for `n` shareholders from a Feldman commitment.
pub fn share_public_keys<E: Element>(commitment: &Poly<E>, n: u32) -> Vec<E> {
    (0..n).map(|i| share_public_key(commitment, i)).collect()
}

/// Verifies that a share is consistent with a Feldman commitment:
/// `g^{share.y} == sum_i commitment_i * share.x^i`.
pub fn verify_share<G: Group>(
    group: &G,
    share: &Share<G::Scalar>,
    commitment: &Poly<G::Element>,
) -> Result<(), Error> {
    let expected = share_public_key(commitment, share.index);
    if share.public(group) != expected {
        return Err(Error::ShareWrongCommitment);
    }
    Ok(())
}

/// Verifies that a share and its blinding value are consistent with a Pedersen commitment:
/// `g^{s} h^{s'} == sum_i commitment_i * x^i`.
pub fn verify_pedersen_share<G: Group>(
    group: &G,
    share: &PedersenShare<G::Scalar>,
    commitment: &Poly<G::Element>,
) -> Result<(), Error> {
    let expected = share_public_key(commitment, share.share.index);
    let actual = group.add(
        &share.share.public(group),
        &group.multiply(&group.pedersen(), &share.blinding),
    );
    if actual != expected {
        return Err(Error::ShareWrongCommitment);
    }
    Ok(())
}

impl<F: PrimeField> Write for Share<F> {
    fn write(&self, buf: &mut impl BufMut) {
        self.index.write(buf);
        write_scalar(&self.private, buf);
    }
}

impl<F: PrimeField> Read for Share<F> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let index = u32::read(buf)?;
        let private = read_scalar(buf)?;
        Ok(Self { index, private })
    }
}

impl<F: PrimeField> EncodeSize for Share<F> {
    fn encode_size(&self) -> usize {
        u32::SIZE + scalar_size::<F>()
    }
}

impl<F: PrimeField> Write for PedersenShare<F> {
    fn write(&self, buf: &mut impl BufMut) {
        self.share.write(buf);
        write_scalar(&self.blinding, buf);
    }
}

impl<F: PrimeField> Read for PedersenShare<F> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let share = Share::read(buf)?;
        let blinding = read_scalar(buf)?;
        Ok(Self { share, blinding })
    }
}

impl<F: PrimeField> EncodeSize for PedersenShare<F> {
    fn encode_size(&self) -> usize {
        self.share.encode_size() + scalar_size::<F>()
    }
}

impl<E: GroupEncoding> Write for PublicKeys<E> {
    fn write(&self, buf: &mut impl BufMut) {
        write_element(&self.secret, buf);
        self.shares.len().write(buf);
        for public in &self.shares {
            write_element(public, buf);
        }
    }
}

/// Views are read with the maximum number of shareholders allowed.
impl<E: GroupEncoding> Read for PublicKeys<E> {
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let secret = read_element(buf)?;
        let range: RangeCfg = (0..=*max).into();
        let len = usize::read_cfg(buf, &range)?;
        let mut shares = Vec::with_capacity(len);
        for _ in 0..len {
            shares.push(read_element(buf)?);
        }
        Ok(Self { secret, shares })
    }
}

impl<E: GroupEncoding> EncodeSize for PublicKeys<E> {
    fn encode_size(&self) -> usize {
        element_size::<E>() + self.shares.len().encode_size() + self.shares.len() * element_size::<E>()
    }
}
