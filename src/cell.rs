//! Cells: a 3×3 exact basis plus the derived quantities the rest of the engine wants,
//! notably the Niggli matrix, which summarizes the metric without caring how the basis is
//! oriented in space.

use nalgebra::Matrix3;
use num_traits::Signed;
use thiserror::Error;

use crate::fract::Rational;
use crate::tensor::{FracTensor, Shape, TensorError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CellError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("cell vectors degenerate or too close to degenerate")]
    DegenerateCell,
}

/// A unit cell: exact basis vectors (rows) with non-zero determinant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    basis: FracTensor,
    niggli: FracTensor,
    orientation: i8,
    det: Rational,
}

impl Cell {
    pub fn from_basis(basis: FracTensor) -> Result<Self, CellError> {
        if basis.shape() != Shape::Matrix(3, 3) {
            return Err(TensorError::ShapeMismatch.into());
        }
        let det = basis.det()?;
        if det == Rational::ZERO {
            return Err(TensorError::Singular.into());
        }
        let niggli = niggli_from_basis(&basis)?;
        let orientation = if det < Rational::ZERO { -1 } else { 1 };
        Ok(Self { basis, niggli, orientation, det })
    }

    /// Reconstructs a basis from a Niggli matrix and an orientation sign, in the fixed
    /// upper-triangular-like form `(a,0,0), (b·cosγ, b·sinγ, 0), (…)`. The output is
    /// floating point by nature; entries are rounded to 14 decimals and re-read exactly
    /// so downstream arithmetic stays rational.
    pub fn from_niggli(niggli: &FracTensor, orientation: i8) -> Result<Self, CellError> {
        if niggli.shape() != Shape::Matrix(2, 3) {
            return Err(TensorError::ShapeMismatch.into());
        }
        let s11 = niggli.get2(0, 0).to_f64();
        let s22 = niggli.get2(0, 1).to_f64();
        let s33 = niggli.get2(0, 2).to_f64();
        let s23 = niggli.get2(1, 0).to_f64() / 2.0;
        let s13 = niggli.get2(1, 1).to_f64() / 2.0;
        let s12 = niggli.get2(1, 2).to_f64() / 2.0;

        let (a, b, c) = (s11.sqrt(), s22.sqrt(), s33.sqrt());
        let cos_a = s23 / (b * c);
        let cos_b = s13 / (c * a);
        let cos_y = s12 / (a * b);
        let sin_y = (1.0 - cos_y * cos_y).sqrt();

        let iv =
            1.0 - cos_a * cos_a - cos_b * cos_b - cos_y * cos_y + 2.0 * cos_a * cos_b * cos_y;
        // iv may land very slightly below zero at the accuracy limit.
        let v = if iv > 0.0 { iv.sqrt() } else { 0.0 };
        if c * v < 1e-14 {
            return Err(CellError::DegenerateCell);
        }

        let sign = if orientation < 0 { -1.0 } else { 1.0 };
        let m = Matrix3::new(
            a,
            0.0,
            0.0,
            b * cos_y,
            b * sin_y,
            0.0,
            c * cos_b,
            c * (cos_a - cos_b * cos_y) / sin_y,
            c * v / sin_y,
        ) * sign;

        let mut rows = [[Rational::ZERO; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                // 14 decimals, then exact.
                rows[i][j] = format!("{:.14}", m[(i, j)])
                    .parse()
                    .map_err(CellError::Tensor)?;
            }
        }
        Self::from_basis(FracTensor::matrix3(&rows)?)
    }

    pub fn basis(&self) -> &FracTensor {
        &self.basis
    }

    /// The packed Niggli matrix `(s11,s22,s33; 2s23,2s13,2s12)`.
    pub fn niggli(&self) -> &FracTensor {
        &self.niggli
    }

    pub fn orientation(&self) -> i8 {
        self.orientation
    }

    pub fn det(&self) -> Rational {
        self.det
    }

    pub fn volume(&self) -> Rational {
        self.det.abs()
    }

    /// The reciprocal basis `(M⁻¹)ᵀ`, exact.
    pub fn reciprocal(&self) -> Result<FracTensor, TensorError> {
        self.basis.reciprocal()
    }

    /// The metric tensor, recovered from the Niggli matrix.
    pub fn metric(&self) -> Result<FracTensor, TensorError> {
        let g = |i: usize, j: usize| self.niggli.get2(i, j);
        let half = Rational::ONE_HALF;
        let s23 = g(1, 0) * half;
        let s13 = g(1, 1) * half;
        let s12 = g(1, 2) * half;
        FracTensor::from_rationals(
            Shape::Matrix(3, 3),
            &[g(0, 0), s12, s13, s12, g(0, 1), s23, s13, s23, g(0, 2)],
        )
    }

    pub fn lengths(&self) -> [f64; 3] {
        [
            self.niggli.get2(0, 0).to_f64().sqrt(),
            self.niggli.get2(0, 1).to_f64().sqrt(),
            self.niggli.get2(0, 2).to_f64().sqrt(),
        ]
    }

    /// Cell angles `(α, β, γ)` in degrees.
    pub fn angles(&self) -> [f64; 3] {
        let [a, b, c] = self.lengths();
        let s23 = self.niggli.get2(1, 0).to_f64() / 2.0;
        let s13 = self.niggli.get2(1, 1).to_f64() / 2.0;
        let s12 = self.niggli.get2(1, 2).to_f64() / 2.0;
        [
            (s23 / (b * c)).acos().to_degrees(),
            (s13 / (c * a)).acos().to_degrees(),
            (s12 / (a * b)).acos().to_degrees(),
        ]
    }

    pub fn a(&self) -> f64 {
        self.lengths()[0]
    }

    pub fn b(&self) -> f64 {
        self.lengths()[1]
    }

    pub fn c(&self) -> f64 {
        self.lengths()[2]
    }

    /// Volume after applying an isotropic scale to the basis vectors.
    pub fn volume_from_scale(&self, scale: Rational) -> Result<Rational, TensorError> {
        let s3 = scale.checked_mul(scale)?.checked_mul(scale)?;
        s3.checked_mul(self.volume())
    }

    /// The isotropic scale that gives the basis directions the requested absolute volume.
    pub fn scale_from_volume(&self, volume: f64) -> Result<f64, CellError> {
        let det = self.det.to_f64().abs();
        if det < 1e-12 {
            return Err(CellError::DegenerateCell);
        }
        Ok((volume / det).cbrt())
    }

    /// The basis scaled by an isotropic factor, as a new cell.
    pub fn scaled(&self, scale: Rational) -> Result<Self, CellError> {
        Ok(Self::from_basis(self.basis.scale(scale)?)?)
    }
}

fn niggli_from_basis(basis: &FracTensor) -> Result<FracTensor, TensorError> {
    let row = |i: usize| basis.row(i);
    let dot = |i: usize, j: usize| row(i).dot(&row(j));
    let two = Rational::from(2);
    let values = [
        dot(0, 0)?,
        dot(1, 1)?,
        dot(2, 2)?,
        dot(1, 2)?.checked_mul(two)?,
        dot(0, 2)?.checked_mul(two)?,
        dot(0, 1)?.checked_mul(two)?,
    ];
    Ok(FracTensor::from_rationals(Shape::Matrix(2, 3), &values)?.simplify())
}
