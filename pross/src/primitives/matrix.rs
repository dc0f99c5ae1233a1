//! Square matrices over the scalar field.
//!
//! Used to turn `t` evaluations of a polynomial (or of its commitment) back into
//! coefficients: if `V` is the Vandermonde matrix of the evaluation points, then
//! `coefficients = V^{-1} * values`.

use crate::primitives::{
    group::Element,
    poly::{self, Eval, Poly},
    Error,
};
use p256::elliptic_curve::ff::PrimeField;

/// A square matrix over a prime field, stored row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Matrix<F> {
    rows: Vec<Vec<F>>,
}

impl<F: PrimeField> Matrix<F> {
    /// Returns the `n x n` identity matrix.
    pub fn identity(n: usize) -> Self {
        let rows = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { F::ONE } else { F::ZERO })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    /// Builds the Vandermonde matrix `M[i][j] = xs[i]^j`.
    pub fn vandermonde(xs: &[F]) -> Self {
        let rows = xs
            .iter()
            .map(|xi| {
                let mut power = F::ONE;
                (0..xs.len())
                    .map(|_| {
                        let current = power;
                        power *= xi;
                        current
                    })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    /// Builds the Vandermonde matrix for the x-coordinates `1..=t`.
    pub fn square_vandermonde(t: u32) -> Self {
        let xs = (0..t).map(poly::x::<F>).collect::<Vec<_>>();
        Self::vandermonde(&xs)
    }

    /// Returns the dimension of the matrix.
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Returns the entry at row `i`, column `j`.
    pub fn get(&self, i: usize, j: usize) -> F {
        self.rows[i][j]
    }

    /// Computes the inverse using Gauss-Jordan elimination with row pivoting.
    ///
    /// Returns [Error::SingularMatrix] if no inverse exists (for a Vandermonde matrix,
    /// this happens exactly when two x-coordinates coincide).
    pub fn invert(&self) -> Result<Self, Error> {
        let n = self.size();
        let mut a = self.rows.clone();
        let mut inv = Self::identity(n).rows;

        for col in 0..n {
            // Find a row at or below the diagonal with a nonzero entry in this column
            let pivot = (col..n)
                .find(|&row| !bool::from(a[row][col].is_zero()))
                .ok_or(Error::SingularMatrix)?;
            a.swap(col, pivot);
            inv.swap(col, pivot);

            // Scale the pivot row so the pivot becomes one
            let scale = Option::<F>::from(a[col][col].invert()).ok_or(Error::NoInverse)?;
            for j in 0..n {
                a[col][j] *= scale;
                inv[col][j] *= scale;
            }

            // Eliminate this column from every other row
            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = a[row][col];
                if bool::from(factor.is_zero()) {
                    continue;
                }
                for j in 0..n {
                    let (pivot_a, pivot_inv) = (a[col][j], inv[col][j]);
                    a[row][j] -= factor * pivot_a;
                    inv[row][j] -= factor * pivot_inv;
                }
            }
        }
        Ok(Self { rows: inv })
    }

    /// Computes `M * v` where `v` holds any [Element] (scalars or group elements).
    pub fn multiply<C: Element<Scalar = F>>(&self, v: &[C]) -> Vec<C> {
        self.rows
            .iter()
            .map(|row| {
                row.iter().zip(v).fold(C::zero(), |mut sum, (m, c)| {
                    let mut term = *c;
                    term.mul(m);
                    sum.add(&term);
                    sum
                })
            })
            .collect()
    }

    /// Computes `M * N`.
    pub fn product(&self, other: &Self) -> Self {
        let n = self.size();
        let rows = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| (0..n).fold(F::ZERO, |acc, k| acc + self.rows[i][k] * other.rows[k][j]))
                    .collect()
            })
            .collect();
        Self { rows }
    }
}

/// Recovers every coefficient of a polynomial of degree `evals.len() - 1` from its evaluations.
///
/// Over scalars this is `interpolateCoefficients`; over group elements it recovers the
/// Feldman commitment vector from `t` share public keys.
pub fn interpolate_coefficients<C: Element>(evals: &[Eval<C>]) -> Result<Poly<C>, Error> {
    if evals.is_empty() {
        return Err(Error::NotEnoughEvaluations(0, 1));
    }
    let xs = evals
        .iter()
        .map(|e| poly::x::<C::Scalar>(e.index))
        .collect::<Vec<_>>();
    let inverse = Matrix::vandermonde(&xs)
        .invert()
        .map_err(|_| Error::DuplicateEval)?;
    let values = evals.iter().map(|e| e.value).collect::<Vec<_>>();
    Ok(Poly::from(inverse.multiply(&values)))
}
