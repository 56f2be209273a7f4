//! SISO state-space realizations.
//!
//! ```text
//! x' = A·x + B·u        (x[k+1] for discrete systems)
//! y  = C·x + D·u
//! ```
//!
//! The same struct carries continuous and discrete systems; which one a value
//! is depends on where it came from (`model` or `discretize`).

use crate::error::{DspError, DspResult};
use crate::matrix::Matrix;
use crate::poly;

#[derive(Debug, Clone, PartialEq)]
pub struct StateSpace {
    a: Matrix,
    b: Matrix,
    c: Matrix,
    d: Matrix,
}

fn check(what: &'static str, expected: usize, actual: usize) -> DspResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DspError::DimensionMismatch { what, expected, actual })
    }
}

impl StateSpace {
    /// Validates shapes: A square, rows(A) = rows(B) = cols(C),
    /// rows(C) = rows(D), cols(B) = cols(D), and a 1×1 feedthrough.
    pub fn new(a: Matrix, b: Matrix, c: Matrix, d: Matrix) -> DspResult<Self> {
        check("A columns", a.rows(), a.cols())?;
        check("B rows", a.rows(), b.rows())?;
        check("C columns", a.rows(), c.cols())?;
        check("D rows", c.rows(), d.rows())?;
        check("D columns", b.cols(), d.cols())?;
        check("outputs", 1, d.rows())?;
        check("inputs", 1, d.cols())?;
        Ok(Self { a, b, c, d })
    }

    /// Pure gain with no states.
    pub fn gain(k: f64) -> Self {
        Self {
            a: Matrix::zeros(0, 0),
            b: Matrix::zeros(0, 1),
            c: Matrix::zeros(1, 0),
            d: Matrix::scalar(k),
        }
    }

    /// Controllable canonical realization of `num(s) / den(s)`.
    ///
    /// Coefficients are highest degree first. Leading near-zero denominator
    /// terms are dropped; the numerator may not outrank the denominator.
    pub fn from_transfer_function(num: &[f64], den: &[f64]) -> DspResult<Self> {
        let den = poly::trim_leading(den);
        let num = poly::trim_leading(num);
        if den.is_empty() {
            return Err(DspError::SingularMatrix { pivot: 0.0 });
        }
        let n = den.len() - 1;
        if num.len() > den.len() {
            return Err(DspError::DimensionMismatch {
                what: "numerator degree",
                expected: n,
                actual: num.len() - 1,
            });
        }

        let lead = den[0];
        let a_coef: Vec<f64> = den.iter().map(|c| c / lead).collect();
        let mut b_coef = vec![0.0; n + 1];
        for (i, c) in num.iter().enumerate() {
            b_coef[n + 1 - num.len() + i] = c / lead;
        }

        let d0 = b_coef[0];
        let mut a = Matrix::zeros(n, n);
        let mut b = Matrix::zeros(n, 1);
        let mut c = Matrix::zeros(1, n);
        for i in 0..n {
            a[(0, i)] = -a_coef[i + 1];
            c[(0, i)] = b_coef[i + 1] - a_coef[i + 1] * d0;
            if i > 0 {
                a[(i, i - 1)] = 1.0;
            }
        }
        if n > 0 {
            b[(0, 0)] = 1.0;
        }
        Self::new(a, b, c, Matrix::scalar(d0))
    }

    pub fn order(&self) -> usize {
        self.a.rows()
    }

    pub fn a(&self) -> &Matrix {
        &self.a
    }

    pub fn b(&self) -> &Matrix {
        &self.b
    }

    pub fn c(&self) -> &Matrix {
        &self.c
    }

    pub fn d(&self) -> f64 {
        self.d[(0, 0)]
    }

    /// Replace A and B, keeping the output equation.
    pub(crate) fn with_dynamics(&self, a: Matrix, b: Matrix) -> DspResult<Self> {
        Self::new(a, b, self.c.clone(), self.d.clone())
    }

    /// Markov parameters h[0] = D, h[k] = C·A^(k-1)·B for k = 1..=count-1.
    pub fn markov_parameters(&self, count: usize) -> Vec<f64> {
        let mut h = Vec::with_capacity(count);
        if count == 0 {
            return h;
        }
        h.push(self.d());
        let mut x: Vec<f64> = (0..self.order()).map(|i| self.b[(i, 0)]).collect();
        for _ in 1..count {
            h.push(self.c.mul_vec(&x)[0]);
            x = self.a.mul_vec(&x);
        }
        h
    }

    /// Step the discrete system once: returns y[k] and advances `x` in place.
    pub fn step(&self, x: &mut Vec<f64>, u: f64) -> f64 {
        let y = self.c.mul_vec(x)[0] + self.d() * u;
        let mut next = self.a.mul_vec(x);
        for (i, xi) in next.iter_mut().enumerate() {
            *xi += self.b[(i, 0)] * u;
        }
        *x = next;
        y
    }
}
