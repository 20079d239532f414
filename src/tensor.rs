//! Rank-0 through rank-3 tensors of exact rationals sharing a single denominator.
//!
//! A [`FracTensor`] is semantically `(1/denom) × noms`: one positive denominator for the
//! whole tensor keeps linear algebra in plain integer arithmetic, which is what makes the
//! symmetry search and the content hash exact. The layout is a shape, a flat nominator
//! array and the shared denominator; every operation that can grow the integers is
//! checked and fails with [`TensorError::Overflow`] rather than wrapping.

use std::fmt::Display;

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

use crate::fract::{gcd, lcm, BaseInt, Rational};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TensorError {
    #[error("shape mismatch between operands")]
    ShapeMismatch,
    #[error("singular matrix where an inverse was requested")]
    Singular,
    #[error("integer overflow in exact arithmetic")]
    Overflow,
    #[error("cannot parse number: {0}")]
    BadNumber(String),
}

/// Tensor shape, rank 0 to 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
    Cube(usize, usize, usize),
}

impl Shape {
    pub fn count(&self) -> usize {
        match *self {
            Shape::Scalar => 1,
            Shape::Vector(n) => n,
            Shape::Matrix(n, m) => n * m,
            Shape::Cube(n, m, p) => n * m * p,
        }
    }

    pub fn rank(&self) -> usize {
        match *self {
            Shape::Scalar => 0,
            Shape::Vector(_) => 1,
            Shape::Matrix(..) => 2,
            Shape::Cube(..) => 3,
        }
    }
}

/// Immutable exact tensor over a shared denominator.
#[derive(Debug, Clone)]
pub struct FracTensor {
    shape: Shape,
    noms: Vec<BaseInt>,
    denom: BaseInt,
}

impl FracTensor {
    /// Raw constructor. `denom` must be positive and `noms.len()` must match the shape.
    pub fn new(shape: Shape, noms: Vec<BaseInt>, denom: BaseInt) -> Result<Self, TensorError> {
        if denom <= 0 || noms.len() != shape.count() {
            return Err(TensorError::ShapeMismatch);
        }
        Ok(Self { shape, noms, denom })
    }

    pub fn scalar(r: Rational) -> Self {
        Self { shape: Shape::Scalar, noms: vec![r.numer()], denom: r.denom() }
    }

    pub fn zeros(shape: Shape) -> Self {
        Self { noms: vec![0; shape.count()], shape, denom: 1 }
    }

    pub fn identity(n: usize) -> Self {
        let mut noms = vec![0; n * n];
        for i in 0..n {
            noms[i * n + i] = 1;
        }
        Self { shape: Shape::Matrix(n, n), noms, denom: 1 }
    }

    /// Builds from rationals by putting everything over the lcm of the denominators.
    pub fn from_rationals(shape: Shape, values: &[Rational]) -> Result<Self, TensorError> {
        if values.len() != shape.count() {
            return Err(TensorError::ShapeMismatch);
        }
        let mut d: BaseInt = 1;
        for v in values {
            d = lcm(d, v.simplify().denom())?;
        }
        let noms = values
            .iter()
            .map(|v| {
                let v = v.simplify();
                v.numer().checked_mul(d / v.denom()).ok_or(TensorError::Overflow)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { shape, noms, denom: d })
    }

    pub fn vector(values: &[Rational]) -> Result<Self, TensorError> {
        Self::from_rationals(Shape::Vector(values.len()), values)
    }

    /// Builds from decimal text tokens, recovering the exact rationals the text most
    /// plausibly describes (`"0.3333"` becomes 1/3; a `(sd)` suffix widens the interval).
    pub fn from_strings(shape: Shape, tokens: &[&str]) -> Result<Self, TensorError> {
        let values = tokens
            .iter()
            .map(|t| crate::parsing::parse_decimal(t, Some(crate::parsing::default_min_accuracy())))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_rationals(shape, &values)
    }

    pub fn matrix3(rows: &[[Rational; 3]; 3]) -> Result<Self, TensorError> {
        let flat: Vec<Rational> = rows.iter().flatten().copied().collect();
        Self::from_rationals(Shape::Matrix(3, 3), &flat)
    }

    /// An N×3 coordinate tensor from rows.
    pub fn from_coord_rows(rows: &[[Rational; 3]]) -> Result<Self, TensorError> {
        let flat: Vec<Rational> = rows.iter().flatten().copied().collect();
        Self::from_rationals(Shape::Matrix(rows.len(), 3), &flat)
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn denom(&self) -> BaseInt {
        self.denom
    }

    pub fn noms(&self) -> &[BaseInt] {
        &self.noms
    }

    pub fn as_rational(&self) -> Result<Rational, TensorError> {
        match self.shape {
            Shape::Scalar => Ok(Rational::new(self.noms[0], self.denom)),
            _ => Err(TensorError::ShapeMismatch),
        }
    }

    pub fn get1(&self, i: usize) -> Rational {
        debug_assert!(matches!(self.shape, Shape::Vector(_)));
        Rational::new(self.noms[i], self.denom)
    }

    pub fn get2(&self, i: usize, j: usize) -> Rational {
        let Shape::Matrix(_, m) = self.shape else {
            panic!("get2 on non-matrix tensor");
        };
        Rational::new(self.noms[i * m + j], self.denom)
    }

    /// Rows of an N×3 tensor as rational triples.
    pub fn coord_rows(&self) -> Vec<[Rational; 3]> {
        let Shape::Matrix(n, 3) = self.shape else {
            panic!("coord_rows on tensor that is not N×3");
        };
        (0..n)
            .map(|i| [self.get2(i, 0), self.get2(i, 1), self.get2(i, 2)])
            .collect()
    }

    pub fn row(&self, i: usize) -> Self {
        let Shape::Matrix(_, m) = self.shape else {
            panic!("row on non-matrix tensor");
        };
        Self {
            shape: Shape::Vector(m),
            noms: self.noms[i * m..(i + 1) * m].to_vec(),
            denom: self.denom,
        }
    }

    fn same_shape(&self, other: &Self) -> Result<(), TensorError> {
        if self.shape == other.shape {
            Ok(())
        } else {
            Err(TensorError::ShapeMismatch)
        }
    }

    pub fn add(&self, other: &Self) -> Result<Self, TensorError> {
        self.same_shape(other)?;
        let d = lcm(self.denom, other.denom)?;
        let (ma, mb) = (d / self.denom, d / other.denom);
        let noms = self
            .noms
            .iter()
            .zip(&other.noms)
            .map(|(&a, &b)| {
                a.checked_mul(ma)
                    .and_then(|x| b.checked_mul(mb).and_then(|y| x.checked_add(y)))
                    .ok_or(TensorError::Overflow)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { shape: self.shape, noms, denom: d })
    }

    pub fn sub(&self, other: &Self) -> Result<Self, TensorError> {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> Self {
        Self {
            shape: self.shape,
            noms: self.noms.iter().map(|&x| -x).collect(),
            denom: self.denom,
        }
    }

    pub fn scale(&self, r: Rational) -> Result<Self, TensorError> {
        let r = r.simplify();
        let noms = self
            .noms
            .iter()
            .map(|&x| x.checked_mul(r.numer()).ok_or(TensorError::Overflow))
            .collect::<Result<Vec<_>, _>>()?;
        let denom = self.denom.checked_mul(r.denom()).ok_or(TensorError::Overflow)?;
        Ok(Self { shape: self.shape, noms, denom })
    }

    pub fn scale_div(&self, r: Rational) -> Result<Self, TensorError> {
        self.scale(r.recip()?)
    }

    /// Matrix-style multiplication, contracting the last axis of `self` with the first of
    /// `other`. Two vectors multiply elementwise (use [`FracTensor::dot`] for contraction),
    /// scalars scale.
    pub fn mul(&self, other: &Self) -> Result<Self, TensorError> {
        let denom = self.denom.checked_mul(other.denom).ok_or(TensorError::Overflow)?;
        let prod = |a: BaseInt, b: BaseInt| a.checked_mul(b).ok_or(TensorError::Overflow);
        match (self.shape, other.shape) {
            (Shape::Scalar, _) => other.scale(Rational::new(self.noms[0], self.denom)),
            (_, Shape::Scalar) => self.scale(Rational::new(other.noms[0], other.denom)),
            (Shape::Vector(n), Shape::Vector(m)) => {
                if n != m {
                    return Err(TensorError::ShapeMismatch);
                }
                let noms = self
                    .noms
                    .iter()
                    .zip(&other.noms)
                    .map(|(&a, &b)| prod(a, b))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self { shape: Shape::Vector(n), noms, denom })
            }
            (Shape::Matrix(n, m), Shape::Vector(k)) => {
                if m != k {
                    return Err(TensorError::ShapeMismatch);
                }
                let mut noms = Vec::with_capacity(n);
                for i in 0..n {
                    let mut acc: BaseInt = 0;
                    for j in 0..m {
                        acc = acc
                            .checked_add(prod(self.noms[i * m + j], other.noms[j])?)
                            .ok_or(TensorError::Overflow)?;
                    }
                    noms.push(acc);
                }
                Ok(Self { shape: Shape::Vector(n), noms, denom })
            }
            (Shape::Vector(k), Shape::Matrix(n, m)) => {
                if k != n {
                    return Err(TensorError::ShapeMismatch);
                }
                let mut noms = Vec::with_capacity(m);
                for j in 0..m {
                    let mut acc: BaseInt = 0;
                    for i in 0..n {
                        acc = acc
                            .checked_add(prod(self.noms[i], other.noms[i * m + j])?)
                            .ok_or(TensorError::Overflow)?;
                    }
                    noms.push(acc);
                }
                Ok(Self { shape: Shape::Vector(m), noms, denom })
            }
            (Shape::Matrix(n, m), Shape::Matrix(k, p)) => {
                if m != k {
                    return Err(TensorError::ShapeMismatch);
                }
                let mut noms = Vec::with_capacity(n * p);
                for i in 0..n {
                    for j in 0..p {
                        let mut acc: BaseInt = 0;
                        for l in 0..m {
                            acc = acc
                                .checked_add(prod(self.noms[i * m + l], other.noms[l * p + j])?)
                                .ok_or(TensorError::Overflow)?;
                        }
                        noms.push(acc);
                    }
                }
                Ok(Self { shape: Shape::Matrix(n, p), noms, denom })
            }
            _ => Err(TensorError::ShapeMismatch),
        }
    }

    pub fn dot(&self, other: &Self) -> Result<Rational, TensorError> {
        match (self.shape, other.shape) {
            (Shape::Vector(n), Shape::Vector(m)) if n == m => {
                let mut acc: BaseInt = 0;
                for (a, b) in self.noms.iter().zip(&other.noms) {
                    acc = acc
                        .checked_add(a.checked_mul(*b).ok_or(TensorError::Overflow)?)
                        .ok_or(TensorError::Overflow)?;
                }
                let denom = self.denom.checked_mul(other.denom).ok_or(TensorError::Overflow)?;
                Ok(Rational::new(acc, denom))
            }
            _ => Err(TensorError::ShapeMismatch),
        }
    }

    pub fn cross(&self, other: &Self) -> Result<Self, TensorError> {
        match (self.shape, other.shape) {
            (Shape::Vector(3), Shape::Vector(3)) => {
                let a = &self.noms;
                let b = &other.noms;
                let p = |x: BaseInt, y: BaseInt| x.checked_mul(y).ok_or(TensorError::Overflow);
                let noms = vec![
                    p(a[1], b[2])?.checked_sub(p(a[2], b[1])?).ok_or(TensorError::Overflow)?,
                    p(a[2], b[0])?.checked_sub(p(a[0], b[2])?).ok_or(TensorError::Overflow)?,
                    p(a[0], b[1])?.checked_sub(p(a[1], b[0])?).ok_or(TensorError::Overflow)?,
                ];
                let denom = self.denom.checked_mul(other.denom).ok_or(TensorError::Overflow)?;
                Ok(Self { shape: Shape::Vector(3), noms, denom })
            }
            _ => Err(TensorError::ShapeMismatch),
        }
    }

    pub fn lengthsqr(&self) -> Result<Rational, TensorError> {
        self.dot(self)
    }

    pub fn transpose(&self) -> Self {
        match self.shape {
            Shape::Scalar | Shape::Vector(_) => self.clone(),
            Shape::Matrix(n, m) => {
                let mut noms = Vec::with_capacity(n * m);
                for j in 0..m {
                    for i in 0..n {
                        noms.push(self.noms[i * m + j]);
                    }
                }
                Self { shape: Shape::Matrix(m, n), noms, denom: self.denom }
            }
            Shape::Cube(..) => panic!("transpose on rank-3 tensor"),
        }
    }

    /// 3×3 determinant as a scalar rational, `det(noms) / denom³`.
    pub fn det(&self) -> Result<Rational, TensorError> {
        if self.shape != Shape::Matrix(3, 3) {
            return Err(TensorError::ShapeMismatch);
        }
        let n = det3(&self.noms)?;
        let d3 = self
            .denom
            .checked_mul(self.denom)
            .and_then(|d| d.checked_mul(self.denom))
            .ok_or(TensorError::Overflow)?;
        Ok(Rational::new(n, d3))
    }

    /// 3×3 matrix inverse: `sign(det)·denom·adj(noms) / |det(noms)|`.
    pub fn inv(&self) -> Result<Self, TensorError> {
        if self.shape != Shape::Matrix(3, 3) {
            return Err(TensorError::ShapeMismatch);
        }
        let det_nom = det3(&self.noms)?;
        if det_nom == 0 {
            return Err(TensorError::Singular);
        }
        let (denom, m) = if det_nom < 0 { (-det_nom, -self.denom) } else { (det_nom, self.denom) };
        let a = |i: usize, j: usize| self.noms[i * 3 + j];
        let cof = |p: BaseInt, q: BaseInt, r: BaseInt, s: BaseInt| -> Result<BaseInt, TensorError> {
            let x = p.checked_mul(q).ok_or(TensorError::Overflow)?;
            let y = r.checked_mul(s).ok_or(TensorError::Overflow)?;
            x.checked_sub(y).ok_or(TensorError::Overflow)
        };
        let adj = [
            cof(a(1, 1), a(2, 2), a(1, 2), a(2, 1))?,
            cof(a(0, 2), a(2, 1), a(0, 1), a(2, 2))?,
            cof(a(0, 1), a(1, 2), a(0, 2), a(1, 1))?,
            cof(a(1, 2), a(2, 0), a(1, 0), a(2, 2))?,
            cof(a(0, 0), a(2, 2), a(0, 2), a(2, 0))?,
            cof(a(0, 2), a(1, 0), a(0, 0), a(1, 2))?,
            cof(a(1, 0), a(2, 1), a(1, 1), a(2, 0))?,
            cof(a(0, 1), a(2, 0), a(0, 0), a(2, 1))?,
            cof(a(0, 0), a(1, 1), a(0, 1), a(1, 0))?,
        ];
        let noms = adj
            .iter()
            .map(|&x| x.checked_mul(m).ok_or(TensorError::Overflow))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { shape: Shape::Matrix(3, 3), noms, denom })
    }

    /// Reciprocal basis of a 3×3 row basis: `(M⁻¹)ᵀ`.
    pub fn reciprocal(&self) -> Result<Self, TensorError> {
        Ok(self.inv()?.transpose())
    }

    /// Smallest equivalent shared denominator.
    pub fn simplify(&self) -> Self {
        if self.denom == 1 {
            return self.clone();
        }
        let mut g = self.denom;
        for &n in &self.noms {
            g = gcd(g, n);
            if g == 1 {
                return self.clone();
            }
        }
        Self {
            shape: self.shape,
            noms: self.noms.iter().map(|&n| n / g).collect(),
            denom: self.denom / g,
        }
    }

    /// Every element shifted by an integer into `[0, 1)`: `x − ⌊x·denom⌋/denom` elementwise.
    pub fn normalize(&self) -> Self {
        let d = self.denom;
        Self {
            shape: self.shape,
            noms: self.noms.iter().map(|&x| x - d * x.div_euclid(d)).collect(),
            denom: d,
        }
    }

    /// Every element shifted by an integer into `[-1/2, 1/2)`.
    pub fn normalize_half(&self) -> Self {
        let d = self.denom;
        Self {
            shape: self.shape,
            noms: self
                .noms
                .iter()
                .map(|&x| {
                    let k = ((2 * x).div_euclid(d) + 1).div_euclid(2);
                    x - d * k
                })
                .collect(),
            denom: d,
        }
    }

    /// Best element-wise approximations with denominators at most `max_denom`, put back on
    /// a shared denominator (which may exceed `max_denom`).
    pub fn limit_denominator(&self, max_denom: BaseInt) -> Result<Self, TensorError> {
        let values: Vec<Rational> = self
            .noms
            .iter()
            .map(|&n| Rational::new(n, self.denom).limit_denominator(max_denom))
            .collect();
        Self::from_rationals(self.shape, &values)
    }

    /// Every element rounded to the nearest multiple of `1/set_denom`.
    pub fn set_denominator(&self, set_denom: BaseInt) -> Result<Self, TensorError> {
        if set_denom < 1 {
            return Err(TensorError::ShapeMismatch);
        }
        let d = self.denom;
        let noms = self
            .noms
            .iter()
            .map(|&x| {
                let scaled = x.checked_mul(set_denom).ok_or(TensorError::Overflow)?;
                let low = scaled.div_euclid(d);
                Ok(if 2 * scaled > (2 * low + 1) * d { low + 1 } else { low })
            })
            .collect::<Result<Vec<_>, TensorError>>()?;
        Ok(Self { shape: self.shape, noms, denom: set_denom })
    }

    pub fn iter(&self) -> impl Iterator<Item = Rational> + '_ {
        self.noms.iter().map(move |&n| Rational::new(n, self.denom))
    }

    pub fn to_matrix3_f64(&self) -> Result<Matrix3<f64>, TensorError> {
        if self.shape != Shape::Matrix(3, 3) {
            return Err(TensorError::ShapeMismatch);
        }
        let d = self.denom as f64;
        Ok(Matrix3::from_fn(|i, j| self.noms[i * 3 + j] as f64 / d))
    }

    pub fn to_vector3_f64(&self) -> Result<Vector3<f64>, TensorError> {
        if self.shape != Shape::Vector(3) {
            return Err(TensorError::ShapeMismatch);
        }
        let d = self.denom as f64;
        Ok(Vector3::new(
            self.noms[0] as f64 / d,
            self.noms[1] as f64 / d,
            self.noms[2] as f64 / d,
        ))
    }
}

impl PartialEq for FracTensor {
    fn eq(&self, other: &Self) -> bool {
        if self.shape != other.shape {
            return false;
        }
        let a = self.simplify();
        let b = other.simplify();
        a.denom == b.denom && a.noms == b.noms
    }
}

impl Eq for FracTensor {}

impl std::hash::Hash for FracTensor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        let s = self.simplify();
        s.shape.hash(state);
        s.noms.hash(state);
        s.denom.hash(state);
    }
}

impl Display for FracTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.shape {
            Shape::Scalar => write!(f, "{}", Rational::new(self.noms[0], self.denom)),
            Shape::Vector(n) => {
                let parts: Vec<String> =
                    (0..n).map(|i| Rational::new(self.noms[i], self.denom).to_string()).collect();
                write!(f, "[{}]", parts.join(" "))
            }
            Shape::Matrix(n, _) => {
                let rows: Vec<String> = (0..n).map(|i| self.row(i).to_string()).collect();
                write!(f, "[{}]", rows.join(" "))
            }
            Shape::Cube(..) => write!(f, "<rank-3 tensor>"),
        }
    }
}

fn det3(n: &[BaseInt]) -> Result<BaseInt, TensorError> {
    let p = |a: BaseInt, b: BaseInt, c: BaseInt| -> Result<BaseInt, TensorError> {
        a.checked_mul(b).and_then(|x| x.checked_mul(c)).ok_or(TensorError::Overflow)
    };
    let pos = p(n[0], n[4], n[8])?
        .checked_add(p(n[1], n[5], n[6])?)
        .and_then(|x| x.checked_add(p(n[2], n[3], n[7]).ok()?))
        .ok_or(TensorError::Overflow)?;
    let negs = p(n[2], n[4], n[6])?
        .checked_add(p(n[1], n[3], n[8])?)
        .and_then(|x| x.checked_add(p(n[0], n[5], n[7]).ok()?))
        .ok_or(TensorError::Overflow)?;
    pos.checked_sub(negs).ok_or(TensorError::Overflow)
}

/// Mutable companion to [`FracTensor`] for in-place construction. Convert with
/// [`MutFracTensor::freeze`] before publishing; nothing else in the crate accepts it.
#[derive(Debug, Clone)]
pub struct MutFracTensor {
    shape: Shape,
    noms: Vec<BaseInt>,
    denom: BaseInt,
}

impl MutFracTensor {
    pub fn zeros(shape: Shape) -> Self {
        Self { noms: vec![0; shape.count()], shape, denom: 1 }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Sets one element, rescaling the whole tensor if the value needs a finer denominator.
    pub fn set(&mut self, index: &[usize], value: Rational) -> Result<(), TensorError> {
        let flat = self.flatten(index)?;
        let value = value.simplify();
        if self.denom % value.denom() != 0 {
            let d = lcm(self.denom, value.denom())?;
            let m = d / self.denom;
            for n in &mut self.noms {
                *n = n.checked_mul(m).ok_or(TensorError::Overflow)?;
            }
            self.denom = d;
        }
        self.noms[flat] = value
            .numer()
            .checked_mul(self.denom / value.denom())
            .ok_or(TensorError::Overflow)?;
        Ok(())
    }

    pub fn get(&self, index: &[usize]) -> Result<Rational, TensorError> {
        Ok(Rational::new(self.noms[self.flatten(index)?], self.denom))
    }

    fn flatten(&self, index: &[usize]) -> Result<usize, TensorError> {
        match (self.shape, index) {
            (Shape::Scalar, []) => Ok(0),
            (Shape::Vector(n), &[i]) if i < n => Ok(i),
            (Shape::Matrix(n, m), &[i, j]) if i < n && j < m => Ok(i * m + j),
            (Shape::Cube(n, m, p), &[i, j, k]) if i < n && j < m && k < p => {
                Ok((i * m + j) * p + k)
            }
            _ => Err(TensorError::ShapeMismatch),
        }
    }

    pub fn freeze(self) -> FracTensor {
        FracTensor { shape: self.shape, noms: self.noms, denom: self.denom }.simplify()
    }
}
