#![allow(non_snake_case)]

//! Cholesky factorisation of positive semi-definite matrices.
//!
//! Covariances used for sampling noise may be semi-definite (a zero process noise is common),
//! which the nalgebra Cholesky decomposition rejects. The factorisation here is the
//! upper triangular form UC with M = UC.UC' and accepts zero pivots as long as the
//! corresponding column is also zero.

use na::{allocator::Allocator, DefaultAllocator, Dim, MatrixN, RealField};
use nalgebra as na;

/// In place upper triangular Cholesky factor of a positive semi-definite matrix M.
///
/// The strict lower triangle of M is ignored on input and zeroed on output.
/// Columns are factorised from last to first so that each pivot only depends on the
/// Schur complement of the columns already processed.
///
/// Return: reciprocal condition number of M, negative if M is not PSD or not square, 0 if semi-definite (including zero).
pub fn upper_factor_psd<N: RealField, D: Dim>(M: &mut MatrixN<N, D>) -> N
where
    DefaultAllocator: Allocator<N, D, D>,
{
    let n = M.nrows();
    if M.ncols() != n {
        return -N::one();
    }
    for j in (0..n).rev() {
        let d = M[(j, j)];
        if d > N::zero() {
            let root = d.sqrt();
            M[(j, j)] = root;
            let inv_root = N::one() / root;

            for i in 0..j {
                let e = inv_root * M[(i, j)];
                M[(i, j)] = e;
                // Schur complement of the leading block
                for k in 0..=i {
                    let t = e * M[(k, j)];
                    M[(k, i)] -= t;
                }
            }
        } else if d == N::zero() {
            // A zero pivot requires a zero column, otherwise the matrix is indefinite
            for i in 0..j {
                if M[(i, j)] != N::zero() {
                    return -N::one();
                }
            }
        } else {
            // Negative or NaN pivot
            return -N::one();
        }
    }

    M.fill_lower_triangle(N::zero(), 1);

    // The factor diagonal is the square root of the pivots, so square its rcond
    let rcond = rcond_diagonal(M);
    if rcond < N::zero() {
        rcond
    } else {
        rcond * rcond
    }
}

/// Estimate the reciprocal condition number of the diagonal of a matrix.
///
/// Defined as min/max of the diagonal elements:
///  0 for an empty, semi-definite or infinite diagonal,
///  negative for any negative or NaN element.
pub fn rcond_diagonal<N: RealField, D: Dim>(M: &MatrixN<N, D>) -> N
where
    DefaultAllocator: Allocator<N, D, D>,
{
    let n = M.nrows().min(M.ncols());
    if n == 0 {
        return N::zero();
    }

    let mut mind = M[(0, 0)];
    let mut maxd = mind;
    for i in 0..n {
        let d = M[(i, i)];
        if d != d {
            return -N::one();
        }
        if d < mind {
            mind = d;
        }
        if d > maxd {
            maxd = d;
        }
    }

    if mind < N::zero() {
        return mind;
    }
    let rcond = mind / maxd;
    if rcond != rcond {
        // NaN from zero/zero or infinity/infinity
        N::zero()
    } else {
        rcond
    }
}
