//! Matrices over GF(256).
//!
//! Row-major byte matrices with the constructors the codec needs
//! (Vandermonde and Cauchy generator matrices, including row-selected
//! variants), dense submatrix extraction, GF(256) matrix multiply, and
//! in-place Gauss-Jordan inversion.
//!
//! Inversion of a singular matrix is an expected failure and returns
//! [`Error::NotInvertible`]. A zero denominator in the Cauchy construction
//! is a programming error and asserts.

use crate::gf;
use crate::{Error, Result};

/// A row-major matrix of GF(256) elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<u8>,
}

impl Matrix {
    /// All-zero matrix.
    pub fn zero(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0; rows * cols],
        }
    }

    /// The `n x n` identity.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zero(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1;
        }
        m
    }

    /// Vandermonde matrix: entry `(i, j) = g^(i*j mod 255)`.
    ///
    /// The first row and the first column are all ones.
    pub fn vandermonde(rows: usize, cols: usize) -> Self {
        Self::vandermonde_for_rows(cols, &(0..rows as u8).collect::<Vec<_>>())
    }

    /// Vandermonde matrix whose rows are selected by an explicit row list;
    /// row `i` of the result is row `row_list[i]` of the full matrix.
    pub fn vandermonde_for_rows(cols: usize, row_list: &[u8]) -> Self {
        let mut m = Self::zero(row_list.len(), cols);
        for (i, &r) in row_list.iter().enumerate() {
            for j in 0..cols {
                m.data[i * cols + j] = gf::pow(gf::GENERATOR, r as usize * j);
            }
        }
        m
    }

    /// Cauchy matrix: entry `(i, j) = 1 / (i ^ (rows + j))`.
    ///
    /// The denominator is non-zero because `i < rows <= rows + j`; as
    /// integers the two operand sets are disjoint, so their XOR cannot
    /// vanish. Requires `rows + cols <= 256` so every operand stays a field
    /// element.
    pub fn cauchy(rows: usize, cols: usize) -> Self {
        debug_assert!(rows + cols <= 256);
        let mut m = Self::zero(rows, cols);
        for i in 0..rows {
            for j in 0..cols {
                let denom = (i ^ (rows + j)) as u8;
                debug_assert!(denom != 0);
                m.data[i * cols + j] = gf::div(1, denom);
            }
        }
        m
    }

    /// Systematic Cauchy matrix over a row list: the first
    /// `systematic_rows` rows are identity rows, the rest are Cauchy rows
    /// `1 / (row_list[i] ^ (rows + j))`.
    pub fn cauchy_systematic(systematic_rows: usize, cols: usize, row_list: &[u8]) -> Self {
        let rows = row_list.len();
        debug_assert!(systematic_rows <= rows);
        debug_assert!(rows + cols <= 256);
        let mut m = Self::zero(rows, cols);
        for i in 0..rows {
            if i < systematic_rows {
                if i < cols {
                    m.data[i * cols + i] = 1;
                }
            } else {
                for j in 0..cols {
                    let denom = (row_list[i] as usize ^ (rows + j)) as u8;
                    debug_assert!(denom != 0);
                    m.data[i * cols + j] = gf::div(1, denom);
                }
            }
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> u8 {
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: u8) {
        self.data[r * self.cols + c] = v;
    }

    /// Borrow row `r` as a slice.
    #[inline]
    pub fn row(&self, r: usize) -> &[u8] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Dense rectangular extract of rows `[r0, r1)` and columns `[c0, c1)`.
    pub fn sub_matrix(&self, r0: usize, c0: usize, r1: usize, c1: usize) -> Matrix {
        debug_assert!(r0 <= r1 && r1 <= self.rows);
        debug_assert!(c0 <= c1 && c1 <= self.cols);
        let mut out = Matrix::zero(r1 - r0, c1 - c0);
        for r in r0..r1 {
            let dst = (r - r0) * out.cols;
            out.data[dst..dst + out.cols]
                .copy_from_slice(&self.data[r * self.cols + c0..r * self.cols + c1]);
        }
        out
    }

    /// Copy row `src` of `other` into row `dst` of `self`.
    pub fn copy_row_from(&mut self, dst: usize, other: &Matrix, src: usize) {
        debug_assert_eq!(self.cols, other.cols);
        self.data[dst * self.cols..(dst + 1) * self.cols].copy_from_slice(other.row(src));
    }

    /// Matrix product `self * rhs` in GF(256).
    ///
    /// Accumulates whole output rows through the arithmetic kernel:
    /// `C[r] ^= A[r][k] * B[k]` for each `k`.
    pub fn multiply(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.cols, rhs.rows, "matrix dimension mismatch");
        let mut out = Matrix::zero(self.rows, rhs.cols);
        for r in 0..self.rows {
            let out_row = &mut out.data[r * rhs.cols..(r + 1) * rhs.cols];
            for k in 0..self.cols {
                gf::mul_add_mem(out_row, rhs.row(k), self.data[r * self.cols + k]);
            }
        }
        out
    }

    /// Whether this is the identity matrix.
    pub fn is_identity(&self) -> bool {
        if self.rows != self.cols {
            return false;
        }
        for i in 0..self.rows {
            for j in 0..self.cols {
                let want = u8::from(i == j);
                if self.data[i * self.cols + j] != want {
                    return false;
                }
            }
        }
        true
    }

    /// In-place Gauss-Jordan inversion of a square matrix.
    ///
    /// Pivot search swaps with the first lower row holding a non-zero in
    /// the pivot column; no such row means the matrix is singular and the
    /// contents are left in an unspecified intermediate state. Rows that
    /// already carry an identity pivot are neither scaled nor used to
    /// eliminate zero entries, so inverting the identity does no arithmetic
    /// at all; decoding with nothing lost stays free.
    pub fn invert(&mut self) -> Result<()> {
        assert_eq!(self.rows, self.cols, "only square matrices invert");
        let n = self.rows;
        let mut inverse = Matrix::identity(n);

        for i in 0..n {
            if self.get(i, i) == 0 {
                let pivot = (i + 1..n).find(|&j| self.get(j, i) != 0);
                match pivot {
                    Some(j) => {
                        self.swap_rows(i, j);
                        inverse.swap_rows(i, j);
                    }
                    None => return Err(Error::NotInvertible),
                }
            }

            let pivot = self.get(i, i);
            if pivot != 1 {
                let inv = gf::div(1, pivot);
                for k in 0..n {
                    self.set(i, k, gf::mul(self.get(i, k), inv));
                    inverse.set(i, k, gf::mul(inverse.get(i, k), inv));
                }
            }

            for j in 0..n {
                if j == i {
                    continue;
                }
                let factor = self.get(j, i);
                if factor == 0 {
                    continue;
                }
                for k in 0..n {
                    let s = gf::mul(factor, self.get(i, k));
                    self.set(j, k, self.get(j, k) ^ s);
                    let t = gf::mul(factor, inverse.get(i, k));
                    inverse.set(j, k, inverse.get(j, k) ^ t);
                }
            }
        }

        *self = inverse;
        Ok(())
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (a, b) = (a.min(b), a.max(b));
        let (top, bottom) = self.data.split_at_mut(b * self.cols);
        top[a * self.cols..(a + 1) * self.cols].swap_with_slice(&mut bottom[..self.cols]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn vandermonde_shape() {
        let m = Matrix::vandermonde(5, 4);
        for j in 0..4 {
            assert_eq!(m.get(0, j), 1);
        }
        for i in 0..5 {
            assert_eq!(m.get(i, 0), 1);
        }
        for i in 0..5 {
            for j in 0..4 {
                assert_eq!(m.get(i, j), gf::pow(gf::GENERATOR, i * j));
            }
        }
    }

    #[test]
    fn vandermonde_row_selection() {
        let full = Matrix::vandermonde(8, 4);
        let picked = Matrix::vandermonde_for_rows(4, &[0, 3, 7]);
        assert_eq!(picked.rows(), 3);
        assert_eq!(picked.row(0), full.row(0));
        assert_eq!(picked.row(1), full.row(3));
        assert_eq!(picked.row(2), full.row(7));
    }

    #[test]
    fn cauchy_entries_nonzero() {
        let m = Matrix::cauchy(6, 4);
        for i in 0..6 {
            for j in 0..4 {
                assert_ne!(m.get(i, j), 0);
                assert_eq!(gf::mul(m.get(i, j), (i ^ (6 + j)) as u8), 1);
            }
        }
    }

    #[test]
    fn cauchy_systematic_top_is_identity() {
        let row_list: Vec<u8> = (0..6).collect();
        let m = Matrix::cauchy_systematic(4, 4, &row_list);
        assert!(m.sub_matrix(0, 0, 4, 4).is_identity());
        for i in 4..6 {
            for j in 0..4 {
                assert_ne!(m.get(i, j), 0);
            }
        }
    }

    #[test]
    fn sub_matrix_extracts() {
        let m = Matrix::vandermonde(6, 6);
        let s = m.sub_matrix(1, 2, 4, 5);
        assert_eq!(s.rows(), 3);
        assert_eq!(s.cols(), 3);
        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(s.get(r, c), m.get(r + 1, c + 2));
            }
        }
    }

    #[test]
    fn identity_inverts_to_itself() {
        for n in [1usize, 2, 5, 16] {
            let mut m = Matrix::identity(n);
            m.invert().unwrap();
            assert!(m.is_identity());
        }
    }

    #[test]
    fn singular_matrix_fails() {
        let mut zero = Matrix::zero(4, 4);
        assert!(matches!(zero.invert(), Err(Error::NotInvertible)));

        // Two equal rows.
        let mut m = Matrix::vandermonde(3, 3);
        let row = m.row(1).to_vec();
        for (j, v) in row.iter().enumerate() {
            m.set(2, j, *v);
        }
        assert!(matches!(m.invert(), Err(Error::NotInvertible)));
    }

    #[test]
    fn random_inverses_round_trip() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in [2usize, 3, 4, 8, 16] {
            let mut tested = 0;
            while tested < 20 {
                let mut m = Matrix::zero(n, n);
                for r in 0..n {
                    for c in 0..n {
                        m.set(r, c, rng.gen());
                    }
                }
                let original = m.clone();
                if m.invert().is_err() {
                    continue;
                }
                tested += 1;

                assert!(original.multiply(&m).is_identity(), "A * inv(A) != I");
                assert!(m.multiply(&original).is_identity(), "inv(A) * A != I");

                let mut twice = m.clone();
                twice.invert().unwrap();
                assert_eq!(twice, original, "inv(inv(A)) != A");
            }
        }
    }

    #[test]
    fn cauchy_is_mds() {
        // Every square submatrix of a Cauchy matrix is invertible; spot
        // check all k-row choices for a small geometry.
        let k = 4;
        let n = 7;
        let m = Matrix::cauchy(n, k);
        for a in 0..n {
            for b in a + 1..n {
                for c in b + 1..n {
                    for d in c + 1..n {
                        let mut sub = Matrix::zero(k, k);
                        for (dst, src) in [a, b, c, d].into_iter().enumerate() {
                            sub.copy_row_from(dst, &m, src);
                        }
                        assert!(sub.invert().is_ok(), "rows {a},{b},{c},{d}");
                    }
                }
            }
        }
    }

    #[test]
    fn multiply_matches_scalar_definition() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut a = Matrix::zero(3, 5);
        let mut b = Matrix::zero(5, 4);
        for r in 0..3 {
            for c in 0..5 {
                a.set(r, c, rng.gen());
            }
        }
        for r in 0..5 {
            for c in 0..4 {
                b.set(r, c, rng.gen());
            }
        }
        let prod = a.multiply(&b);
        for r in 0..3 {
            for c in 0..4 {
                let mut want = 0u8;
                for k in 0..5 {
                    want ^= gf::mul(a.get(r, k), b.get(k, c));
                }
                assert_eq!(prod.get(r, c), want);
            }
        }
    }
}
