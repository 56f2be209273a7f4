//! Dense row-major matrices for the analytical layer.
//!
//! Systems here are small (a handful of states per channel), so everything is
//! plain loops over a `Vec<f64>`. Inversion is Gauss-Jordan with partial
//! pivoting; the complex solve used for frequency response is Gaussian
//! elimination with partial pivoting and back substitution.

use std::ops::{Index, IndexMut};

use num_complex::Complex64;

use crate::error::{DspError, DspResult};

/// Pivots at or below this magnitude make a matrix singular.
pub const PIVOT_EPS: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// Build from row slices. Ragged input is a dimension mismatch.
    pub fn from_rows(rows: &[&[f64]]) -> DspResult<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for r in rows {
            if r.len() != cols {
                return Err(DspError::DimensionMismatch {
                    what: "matrix row length",
                    expected: cols,
                    actual: r.len(),
                });
            }
            data.extend_from_slice(r);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn column(values: &[f64]) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            data: values.to_vec(),
        }
    }

    pub fn row(values: &[f64]) -> Self {
        Self {
            rows: 1,
            cols: values.len(),
            data: values.to_vec(),
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            rows: 1,
            cols: 1,
            data: vec![value],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn row_slice(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Matrix product. Callers guarantee `self.cols == rhs.rows`.
    pub fn mul(&self, rhs: &Matrix) -> Matrix {
        debug_assert_eq!(self.cols, rhs.rows);
        let mut out = Matrix::zeros(self.rows, rhs.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self[(i, k)];
                if a == 0.0 {
                    continue;
                }
                for j in 0..rhs.cols {
                    out[(i, j)] += a * rhs[(k, j)];
                }
            }
        }
        out
    }

    /// y = A·x for a plain vector.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        debug_assert_eq!(self.cols, x.len());
        (0..self.rows)
            .map(|i| self.row_slice(i).iter().zip(x).map(|(a, b)| a * b).sum())
            .collect()
    }

    pub fn add(&self, rhs: &Matrix) -> Matrix {
        debug_assert_eq!((self.rows, self.cols), (rhs.rows, rhs.cols));
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&rhs.data).map(|(a, b)| a + b).collect(),
        }
    }

    pub fn sub(&self, rhs: &Matrix) -> Matrix {
        debug_assert_eq!((self.rows, self.cols), (rhs.rows, rhs.cols));
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&rhs.data).map(|(a, b)| a - b).collect(),
        }
    }

    pub fn scale(&self, scalar: f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|a| a * scalar).collect(),
        }
    }

    /// Add `scalar·I` in place (square matrices).
    pub fn add_diagonal(&mut self, scalar: f64) {
        for i in 0..self.rows.min(self.cols) {
            self[(i, i)] += scalar;
        }
    }

    pub fn trace(&self) -> f64 {
        (0..self.rows.min(self.cols)).map(|i| self[(i, i)]).sum()
    }

    /// Maximum absolute row sum.
    pub fn inf_norm(&self) -> f64 {
        (0..self.rows)
            .map(|i| self.row_slice(i).iter().map(|a| a.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0f64, |m, a| m.max(a.abs()))
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|a| a.is_finite())
    }

    /// Copy `block` into `self` with its top-left corner at `(row, col)`.
    pub fn set_block(&mut self, row: usize, col: usize, block: &Matrix) {
        for i in 0..block.rows {
            for j in 0..block.cols {
                self[(row + i, col + j)] = block[(i, j)];
            }
        }
    }

    /// Copy out the `rows × cols` block starting at `(row, col)`.
    pub fn block(&self, row: usize, col: usize, rows: usize, cols: usize) -> Matrix {
        let mut out = Matrix::zeros(rows, cols);
        for i in 0..rows {
            for j in 0..cols {
                out[(i, j)] = self[(row + i, col + j)];
            }
        }
        out
    }

    /// Gauss-Jordan inverse with partial pivoting.
    pub fn inverse(&self) -> DspResult<Matrix> {
        if !self.is_square() {
            return Err(DspError::DimensionMismatch {
                what: "inverse of non-square matrix",
                expected: self.rows,
                actual: self.cols,
            });
        }
        let n = self.rows;
        let w = 2 * n;
        let mut aug = vec![0.0f64; n * w];
        for i in 0..n {
            for j in 0..n {
                aug[i * w + j] = self[(i, j)];
            }
            aug[i * w + n + i] = 1.0;
        }

        for col in 0..n {
            let mut max_val = aug[col * w + col].abs();
            let mut max_row = col;
            for row in (col + 1)..n {
                let v = aug[row * w + col].abs();
                if v > max_val {
                    max_val = v;
                    max_row = row;
                }
            }
            if !(max_val > PIVOT_EPS) {
                return Err(DspError::SingularMatrix { pivot: max_val });
            }
            if max_row != col {
                for j in 0..w {
                    aug.swap(col * w + j, max_row * w + j);
                }
            }

            let pivot = aug[col * w + col];
            for j in 0..w {
                aug[col * w + j] /= pivot;
            }
            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = aug[row * w + col];
                if factor == 0.0 {
                    continue;
                }
                for j in 0..w {
                    aug[row * w + j] -= factor * aug[col * w + j];
                }
            }
        }

        let mut inv = Matrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                inv[(i, j)] = aug[i * w + n + j];
            }
        }
        Ok(inv)
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    #[inline]
    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.cols + j]
    }
}

/// Solve the complex system `a·x = b` (`a` row-major n×n) by Gaussian
/// elimination with partial pivoting.
pub fn solve_complex(a: &[Complex64], b: &[Complex64]) -> DspResult<Vec<Complex64>> {
    let n = b.len();
    if a.len() != n * n {
        return Err(DspError::DimensionMismatch {
            what: "complex system matrix",
            expected: n * n,
            actual: a.len(),
        });
    }
    let mut m = a.to_vec();
    let mut rhs = b.to_vec();

    for col in 0..n {
        let mut max_abs = m[col * n + col].norm();
        let mut max_row = col;
        for row in (col + 1)..n {
            let v = m[row * n + col].norm();
            if v > max_abs {
                max_abs = v;
                max_row = row;
            }
        }
        if !(max_abs > PIVOT_EPS) {
            return Err(DspError::SingularMatrix { pivot: max_abs });
        }
        if max_row != col {
            for j in 0..n {
                m.swap(col * n + j, max_row * n + j);
            }
            rhs.swap(col, max_row);
        }

        let pivot = m[col * n + col];
        for row in (col + 1)..n {
            let factor = m[row * n + col] / pivot;
            for j in col..n {
                let scaled = factor * m[col * n + j];
                m[row * n + j] -= scaled;
            }
            let scaled = factor * rhs[col];
            rhs[row] -= scaled;
        }
    }

    let mut x = vec![Complex64::new(0.0, 0.0); n];
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for j in (i + 1)..n {
            sum -= m[i * n + j] * x[j];
        }
        x[i] = sum / m[i * n + i];
    }
    Ok(x)
}
