//! Lagrange interpolation in the field and in the exponent.

use crate::primitives::{group::Element, poly::Eval, Error};
use p256::elliptic_curve::ff::{Field, PrimeField};
use std::collections::BTreeSet;

/// Computes the Lagrange basis coefficient `L_{i,j}` for the x-coordinates `xs`, such that
/// `sum_j y_j * L_{i,j} = f(i)`.
///
/// Fails if the denominator is not invertible (which happens only if `xs` contains duplicates).
pub fn interpolate_partial<F: PrimeField>(xs: &[F], i: &F, j: &F) -> Result<F, Error> {
    let (num, den) = xs.iter().filter(|xk| *xk != j).fold(
        (F::ONE, F::ONE),
        |(num, den), xk| (num * (*i - xk), den * (*j - xk)),
    );
    let inv = Option::<F>::from(den.invert()).ok_or(Error::NoInverse)?;
    Ok(num * inv)
}

/// Recovers `f(x)` from at least `threshold` evaluations of a polynomial of degree less
/// than `threshold`.
///
/// Works for any [Element]: over scalars this recovers a field value, over group elements it
/// recovers `g^{f(x)}` without learning `f(x)`. Evaluations are sorted by index and the first
/// `threshold` are used, so two invocations over the same set select the same evaluations.
pub fn interpolate<C: Element>(evals: &[Eval<C>], threshold: u32, x: &C::Scalar) -> Result<C, Error> {
    // Check if we have at least `t` evaluations; if not, return an error
    let t = threshold as usize;
    if evals.len() < t {
        return Err(Error::NotEnoughEvaluations(evals.len(), t));
    }

    // Reject duplicate indices up front
    let mut seen = BTreeSet::new();
    for eval in evals {
        if !seen.insert(eval.index) {
            return Err(Error::DuplicateEval);
        }
    }

    // Take the first `t` evaluations by index
    let mut selected = evals.iter().collect::<Vec<_>>();
    selected.sort_by_key(|e| e.index);
    selected.truncate(t);
    let xs = selected
        .iter()
        .map(|e| crate::primitives::poly::x::<C::Scalar>(e.index))
        .collect::<Vec<_>>();

    // Compute sum_j y_j * L_{x,j}
    let mut sum = C::zero();
    for (eval, xj) in selected.iter().zip(&xs) {
        let lambda = interpolate_partial(&xs, x, xj)?;
        let mut term = eval.value;
        term.mul(&lambda);
        sum.add(&term);
    }
    Ok(sum)
}

/// Recovers the field value `f(x)` at the given x-coordinate (`x = 0` is the secret).
pub fn interpolate_complete<F>(evals: &[Eval<F>], threshold: u32, x: u32) -> Result<F, Error>
where
    F: PrimeField + Element<Scalar = F>,
{
    interpolate(evals, threshold, &F::from(x as u64))
}

/// Recovers `g^{f(x)}` at the given x-coordinate from evaluations in the exponent.
pub fn interpolate_exponents<E: Element>(
    evals: &[Eval<E>],
    threshold: u32,
    x: u32,
) -> Result<E, Error> {
    interpolate(evals, threshold, &E::Scalar::from(x as u64))
}

/// Returns `true` if `value` is the additive identity of the field.
pub(crate) fn is_zero<F: Field>(value: &F) -> bool {
    bool::from(value.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{
        group::{Group, P256},
        poly::{new_from, Poly},
    };
    use commonware_macros::test_traced;
    use p256::Scalar;
    use rand::{rngs::StdRng, SeedableRng};
    use test_case::test_case;

    #[test_case(1, 1; "single")]
    #[test_case(3, 5; "three of five")]
    #[test_case(5, 9; "five of nine")]
    #[test_case(7, 7; "all")]
    fn test_interpolation(t: u32, n: u32) {
        let mut rng = StdRng::seed_from_u64(t as u64);
        let poly = new_from::<Scalar, _>(t - 1, &mut rng);
        let shares = (0..n).map(|i| poly.evaluate(i)).collect::<Vec<_>>();

        // Any `t`-subset recovers the secret
        for start in 0..=(n - t) {
            let subset = &shares[start as usize..(start + t) as usize];
            let recovered = interpolate_complete(subset, t, 0).unwrap();
            assert_eq!(&recovered, poly.constant());
        }

        // `t-1` shares do not
        if t > 1 {
            let subset = &shares[..(t - 1) as usize];
            let recovered = interpolate_complete(subset, t - 1, 0).unwrap();
            assert_ne!(&recovered, poly.constant());
        }
    }

    #[test_traced]
    fn test_interpolation_insufficient() {
        let mut rng = StdRng::seed_from_u64(0);
        let poly = new_from::<Scalar, _>(4, &mut rng);
        let shares = (0..4).map(|i| poly.evaluate(i)).collect::<Vec<_>>();
        assert_eq!(
            interpolate_complete(&shares, 5, 0),
            Err(Error::NotEnoughEvaluations(4, 5))
        );
    }

    #[test_traced]
    fn test_interpolation_duplicate() {
        let mut rng = StdRng::seed_from_u64(0);
        let poly = new_from::<Scalar, _>(2, &mut rng);
        let shares = vec![poly.evaluate(0), poly.evaluate(1), poly.evaluate(1)];
        assert_eq!(
            interpolate_complete(&shares, 3, 0),
            Err(Error::DuplicateEval)
        );
    }

    #[test_traced]
    fn test_interpolation_at_share() {
        let mut rng = StdRng::seed_from_u64(0);
        let poly = new_from::<Scalar, _>(2, &mut rng);
        let shares = (0..3).map(|i| poly.evaluate(i)).collect::<Vec<_>>();
        let recovered = interpolate_complete(&shares, 3, 7).unwrap();
        assert_eq!(recovered, poly.evaluate(6).value);
    }

    #[test_traced]
    fn test_interpolate_exponents() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let poly = new_from::<Scalar, _>(3, &mut rng);
        let commitment = Poly::commit(&poly, group.generator());
        let evals = (2..6)
            .map(|i| commitment.evaluate(i))
            .collect::<Vec<_>>();
        let recovered = interpolate_exponents(&evals, 4, 0).unwrap();
        assert_eq!(recovered, group.exp(poly.constant()));
        let recovered = interpolate_exponents(&evals, 4, 1).unwrap();
        assert_eq!(recovered, group.exp(&poly.evaluate(0).value));
    }

    #[test_traced]
    fn test_partial() {
        let xs = [Scalar::from(1u64), Scalar::from(2u64)];
        // L_{0,1} = (0 - 2) / (1 - 2) = 2
        let lambda = interpolate_partial(&xs, &Scalar::ZERO, &xs[0]).unwrap();
        assert_eq!(lambda, Scalar::from(2u64));
        assert!(!is_zero(&lambda));
    }
}
