//! Polynomial operations over a prime field (and its image in the group).
//!
//! # Warning
//!
//! Shares are always evaluations at `x = index + 1`. Evaluating a sharing polynomial at
//! `x = 0` reveals the secret it protects.

use crate::primitives::group::{element_size, read_element, write_element, Element};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, Write};
use p256::elliptic_curve::{
    ff::{Field, PrimeField},
    group::GroupEncoding,
};
use rand::RngCore;

/// Private polynomials are used to generate secret shares.
pub type Private<F> = Poly<F>;

/// Public polynomials represent commitments to the coefficients of a private polynomial.
pub type Public<E> = Poly<E>;

/// A polynomial evaluation at a specific index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eval<C> {
    pub index: u32,
    pub value: C,
}

/// A polynomial whose coefficients are elements that can be multiplied by the scalar
/// used for the variable x.
///
/// `coefficients[0]` is the constant term and `coefficients[t-1]` the coefficient of `x^(t-1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poly<C>(Vec<C>);

/// Returns the x-coordinate assigned to a shareholder index.
pub fn x<F: PrimeField>(index: u32) -> F {
    F::from(index as u64 + 1)
}

/// Returns a new scalar polynomial of the given degree where each coefficient is
/// sampled at random from the provided RNG.
///
/// In the context of secret sharing, the threshold is the degree + 1.
pub fn new_from<F: PrimeField, R: RngCore>(degree: u32, rng: &mut R) -> Poly<F> {
    let coeffs = (0..=degree).map(|_| F::random(&mut *rng)).collect();
    Poly(coeffs)
}

/// Returns a new random scalar polynomial of the given degree whose evaluation at `zero`
/// is exactly zero.
///
/// Summing such a masking polynomial into an existing sharing leaves the value at `zero`
/// untouched while re-randomizing every other point. `zero = 0` yields a polynomial with
/// no constant term (used to refresh), while `zero = index + 1` yields one that vanishes at a
/// shareholder's position (used to rebuild that shareholder's share).
pub fn new_masking<F: PrimeField, R: RngCore>(degree: u32, zero: F, rng: &mut R) -> Poly<F> {
    let mut poly = new_from(degree, rng);

    // Compute sum_{i=1}^{t-1} a_i * zero^i
    let mut power = F::ONE;
    let mut sum = F::ZERO;
    for coeff in poly.0.iter().skip(1) {
        power *= zero;
        sum += *coeff * power;
    }

    // Make it "negative"
    poly.0[0] = -sum;
    poly
}

impl<C> Poly<C> {
    /// Creates a new polynomial from the given coefficients.
    pub fn from(c: Vec<C>) -> Self {
        Self(c)
    }

    /// Returns the constant term of the polynomial.
    pub fn constant(&self) -> &C {
        &self.0[0]
    }

    /// Returns the degree of the polynomial
    pub fn degree(&self) -> u32 {
        (self.0.len() - 1) as u32 // check size in deserialize, safe to cast
    }

    /// Returns the number of required shares to reconstruct the polynomial.
    ///
    /// This will be the threshold
    pub fn required(&self) -> u32 {
        self.0.len() as u32 // check size in deserialize, safe to cast
    }

    /// Returns the coefficients of the polynomial.
    pub fn coefficients(&self) -> &[C] {
        &self.0
    }
}

impl<C: Element> Poly<C> {
    /// Maps every coefficient `a_i` of a scalar polynomial to `base^{a_i}`.
    pub fn commit(private: &Poly<C::Scalar>, base: C) -> Self {
        let commits = private
            .0
            .iter()
            .map(|c| {
                let mut commitment = base;
                commitment.mul(c);
                commitment
            })
            .collect();
        Self(commits)
    }

    /// Returns a zero polynomial.
    pub fn zero() -> Self {
        Self::from(vec![C::zero()])
    }

    /// Returns the given coefficient at the requested index.
    ///
    /// It panics if the index is out of range.
    pub fn get(&self, i: u32) -> C {
        self.0[i as usize]
    }

    /// Performs polynomial addition in place
    pub fn add(&mut self, other: &Self) {
        // if we have a smaller degree we should pad with zeros
        if self.0.len() < other.0.len() {
            self.0.resize(other.0.len(), C::zero())
        }

        self.0.iter_mut().zip(&other.0).for_each(|(a, b)| a.add(b))
    }

    /// Evaluates the polynomial at an arbitrary x-coordinate using Horner's method.
    pub fn evaluate_at(&self, x: &C::Scalar) -> C {
        self.0.iter().rev().fold(C::zero(), |mut sum, coeff| {
            sum.mul(x);
            sum.add(coeff);
            sum
        })
    }

    /// Evaluates the polynomial at the x-coordinate of the given index.
    pub fn evaluate(&self, index: u32) -> Eval<C> {
        // We add +1 because we must never evaluate the polynomial at its first point
        // otherwise it reveals the "secret" value.
        let xi = x::<C::Scalar>(index);
        Eval {
            index,
            value: self.evaluate_at(&xi),
        }
    }
}

impl<E: GroupEncoding> Write for Poly<E> {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.len().write(buf);
        for coefficient in &self.0 {
            write_element(coefficient, buf);
        }
    }
}

impl<E: GroupEncoding> EncodeSize for Poly<E> {
    fn encode_size(&self) -> usize {
        self.0.len().encode_size() + self.0.len() * element_size::<E>()
    }
}

/// Commitments are read with the maximum number of coefficients allowed.
impl<E: GroupEncoding> Read for Poly<E> {
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let range: RangeCfg = (1..=*max).into();
        let len = usize::read_cfg(buf, &range)?;
        let mut coefficients = Vec::with_capacity(len);
        for _ in 0..len {
            coefficients.push(read_element(buf)?);
        }
        Ok(Self(coefficients))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::lagrange::interpolate_complete;
    use commonware_codec::{Decode, Encode};
    use commonware_macros::test_traced;
    use p256::Scalar;
    use rand::{rngs::StdRng, SeedableRng};

    #[test_traced]
    fn test_degree() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = new_from::<Scalar, _>(5, &mut rng);
        assert_eq!(p.degree(), 5);
        assert_eq!(p.required(), 6);
    }

    #[test_traced]
    fn test_evaluate() {
        // f(x) = 3 + 2x + x^2
        let p = Poly::from(vec![Scalar::from(3u64), Scalar::from(2u64), Scalar::ONE]);
        assert_eq!(p.evaluate(0).value, Scalar::from(6u64));
        assert_eq!(p.evaluate(1).value, Scalar::from(11u64));
        assert_eq!(p.evaluate_at(&Scalar::ZERO), Scalar::from(3u64));
    }

    #[test_traced]
    fn test_add_zero() {
        let mut rng = StdRng::seed_from_u64(0);
        let p1 = new_from::<Scalar, _>(3, &mut rng);
        let mut res = p1.clone();
        res.add(&Poly::zero());
        assert_eq!(res, p1);

        let mut res = Poly::<Scalar>::zero();
        res.add(&p1);
        assert_eq!(res, p1);
    }

    #[test_traced]
    fn test_addition() {
        let mut rng = StdRng::seed_from_u64(0);
        for deg1 in 0..8u32 {
            for deg2 in 0..8u32 {
                let p1 = new_from::<Scalar, _>(deg1, &mut rng);
                let p2 = new_from::<Scalar, _>(deg2, &mut rng);
                let mut res = p1.clone();
                res.add(&p2);
                assert_eq!(res.degree(), deg1.max(deg2));
                for i in 0..10 {
                    assert_eq!(
                        res.evaluate(i).value,
                        p1.evaluate(i).value + p2.evaluate(i).value
                    );
                }
            }
        }
    }

    #[test_traced]
    fn test_masking_zero_intercept() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = new_masking::<Scalar, _>(4, Scalar::ZERO, &mut rng);
        assert_eq!(*p.constant(), Scalar::ZERO);
        assert_ne!(p.evaluate(0).value, Scalar::ZERO);
    }

    #[test_traced]
    fn test_masking_at_index() {
        // n=9, t=5: the masking polynomial vanishes at x=2 and nowhere else in [0, 9]
        let (n, t) = (9u32, 5u32);
        let mut rng = StdRng::seed_from_u64(42);
        let p = new_masking::<Scalar, _>(t - 1, Scalar::from(2u64), &mut rng);
        let shares = (0..n).map(|i| p.evaluate(i)).collect::<Vec<_>>();
        for x in 0..=n {
            let value = interpolate_complete(&shares, n, x).unwrap();
            if x == 2 {
                assert_eq!(value, Scalar::ZERO);
            } else {
                assert_ne!(value, Scalar::ZERO, "x={}", x);
            }
        }
    }

    #[test_traced]
    fn test_commit() {
        let mut rng = StdRng::seed_from_u64(0);
        let secret = new_from::<Scalar, _>(3, &mut rng);
        let g = p256::ProjectivePoint::GENERATOR;
        let commitment = Poly::commit(&secret, g);
        for i in 0..5 {
            assert_eq!(commitment.evaluate(i).value, g * secret.evaluate(i).value);
        }
    }

    #[test_traced]
    fn test_commitment_codec() {
        let mut rng = StdRng::seed_from_u64(0);
        let secret = new_from::<Scalar, _>(2, &mut rng);
        let commitment = Poly::commit(&secret, p256::ProjectivePoint::GENERATOR);
        let encoded = commitment.encode();
        assert_eq!(encoded.len(), commitment.encode_size());
        assert_eq!(
            Poly::<p256::ProjectivePoint>::decode_cfg(encoded.clone(), &3).unwrap(),
            commitment
        );

        // Too many coefficients
        assert!(matches!(
            Poly::<p256::ProjectivePoint>::decode_cfg(encoded, &2),
            Err(CodecError::InvalidLength(3))
        ));

        // Empty
        assert!(matches!(
            Poly::<p256::ProjectivePoint>::decode_cfg(&[0u8][..], &3),
            Err(CodecError::InvalidLength(0))
        ));
    }
}
