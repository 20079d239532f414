//! The content hash: a stable 40-character digest identifying an entity's canonical
//! value, independent of how it was constructed or ordered.
//!
//! Every hashable entity renders itself to a canonical tuple
//! `(type_name, (field_name, value)…)` over its declared schema fields; the tuple is
//! serialized by a fixed pretty-printer (tokens joined by spaces, each nested tuple
//! introduced by a newline) and digested with SHA-1 under the framing
//! `"httk\0" ‖ bytes ‖ "\0" ‖ decimal length ‖ "\0"`. Determinism rules: maps only ever
//! enter as sorted key-value sequences, sets are sorted, and rationals are simplified
//! before rendering.

use sha1::{Digest, Sha1};

use crate::fract::{BaseInt, Rational};
use crate::tensor::{FracTensor, Shape};

/// A node of the canonical tuple tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleValue {
    Str(String),
    Int(BaseInt),
    Rat(Rational),
    Seq(Vec<TupleValue>),
}

impl TupleValue {
    pub fn str(s: impl Into<String>) -> Self {
        TupleValue::Str(s.into())
    }

    pub fn field(name: &str, value: TupleValue) -> Self {
        TupleValue::Seq(vec![TupleValue::str(name), value])
    }

    pub fn ints<I: IntoIterator<Item = BaseInt>>(values: I) -> Self {
        TupleValue::Seq(values.into_iter().map(TupleValue::Int).collect())
    }
}

/// An entity with a declared hashing schema. Nested entities contribute their own
/// hexhash string to the parent's tuple rather than their full tuple.
pub trait Hashable {
    fn canonical_tuple(&self) -> TupleValue;

    fn hexhash(&self) -> String {
        hexhash_tuple(&self.canonical_tuple())
    }
}

fn leaf_string(value: &TupleValue) -> String {
    match value {
        TupleValue::Str(s) => s.clone(),
        TupleValue::Int(i) => i.to_string(),
        TupleValue::Rat(r) => r.simplify().to_string(),
        TupleValue::Seq(_) => unreachable!("sequences are rendered structurally"),
    }
}

/// The fixed tuple serialization: elements joined by `" "`, each nested tuple prefixed
/// with `"\n"` and rendered recursively.
pub fn tuple_to_string(value: &TupleValue) -> String {
    match value {
        TupleValue::Seq(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item {
                    TupleValue::Seq(_) => format!("\n{}", tuple_to_string(item)),
                    leaf => leaf_string(leaf),
                })
                .collect();
            parts.join(" ")
        }
        leaf => leaf_string(leaf),
    }
}

/// SHA-1 over the framed byte string; lowercase hex.
pub fn hexhash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(b"httk\0");
    hasher.update(data);
    hasher.update(b"\0");
    hasher.update(data.len().to_string().as_bytes());
    hasher.update(b"\0");
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn hexhash_tuple(value: &TupleValue) -> String {
    hexhash_bytes(tuple_to_string(value).as_bytes())
}

/// A tensor as nested rows of simplified rationals.
pub fn tensor_tuple(t: &FracTensor) -> TupleValue {
    let s = t.simplify();
    match s.shape() {
        Shape::Scalar => TupleValue::Rat(s.as_rational().expect("scalar shape")),
        Shape::Vector(n) => {
            TupleValue::Seq((0..n).map(|i| TupleValue::Rat(s.get1(i))).collect())
        }
        Shape::Matrix(n, _) => {
            TupleValue::Seq((0..n).map(|i| tensor_tuple(&s.row(i))).collect())
        }
        Shape::Cube(..) => unreachable!("no rank-3 tensors are hashed"),
    }
}

impl Hashable for crate::cell::Cell {
    fn canonical_tuple(&self) -> TupleValue {
        TupleValue::Seq(vec![
            TupleValue::str("Cell"),
            TupleValue::field("niggli_matrix", tensor_tuple(self.niggli())),
            TupleValue::field("orientation", TupleValue::Int(self.orientation() as BaseInt)),
        ])
    }
}

impl Hashable for crate::sites::UnitcellSites {
    fn canonical_tuple(&self) -> TupleValue {
        TupleValue::Seq(vec![
            TupleValue::str("UnitcellSites"),
            TupleValue::field(
                "counts",
                TupleValue::ints(self.counts().iter().map(|&c| c as BaseInt)),
            ),
            TupleValue::field("reduced_coords", tensor_tuple(self.coords())),
        ])
    }
}

impl Hashable for crate::sites::RepresentativeSites {
    fn canonical_tuple(&self) -> TupleValue {
        TupleValue::Seq(vec![
            TupleValue::str("RepresentativeSites"),
            TupleValue::field(
                "counts",
                TupleValue::ints(self.counts().iter().map(|&c| c as BaseInt)),
            ),
            TupleValue::field("reduced_coords", tensor_tuple(self.coords())),
            TupleValue::field(
                "wyckoff_symbols",
                TupleValue::Seq(
                    self.wyckoff_symbols().iter().map(|&w| TupleValue::str(w.to_string())).collect(),
                ),
            ),
            TupleValue::field(
                "multiplicities",
                TupleValue::ints(self.multiplicities().iter().map(|&m| m as BaseInt)),
            ),
        ])
    }
}

impl Hashable for crate::assignments::Assignments {
    fn canonical_tuple(&self) -> TupleValue {
        let groups = self
            .groups()
            .iter()
            .map(|mixture| {
                TupleValue::Seq(
                    mixture
                        .iter()
                        .map(|occ| {
                            TupleValue::Seq(vec![
                                TupleValue::Int(occ.atomic_number as BaseInt),
                                TupleValue::Rat(occ.ratio),
                            ])
                        })
                        .collect(),
                )
            })
            .collect();
        TupleValue::Seq(vec![
            TupleValue::str("Assignments"),
            TupleValue::field("groups", TupleValue::Seq(groups)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::rat;
    use crate::tensor::FracTensor;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_tuple_rendering() {
        let t = TupleValue::Seq(vec![
            TupleValue::str("Cell"),
            TupleValue::field("orientation", TupleValue::Int(1)),
        ]);
        assert_eq!(tuple_to_string(&t), "Cell \norientation 1");
    }

    #[test]
    fn test_rational_leaves_are_simplified() {
        let t = TupleValue::Seq(vec![
            TupleValue::Rat(crate::fract::Rational::new(2, 4)),
            TupleValue::Rat(rat!(3)),
        ]);
        assert_eq!(tuple_to_string(&t), "1/2 3");
    }

    #[test]
    fn test_hexhash_shape() {
        let h = hexhash_bytes(b"abc");
        assert_eq!(h.len(), 40);
        assert!(h.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        // Framing includes the length, so a prefix-shifted payload differs.
        assert_ne!(hexhash_bytes(b"abc"), hexhash_bytes(b"abc\0"));
    }

    #[test]
    fn test_hash_determinism() {
        let cell = |a: i128| {
            Cell::from_basis(
                FracTensor::matrix3(&[
                    [rat!(a), rat!(0), rat!(0)],
                    [rat!(0), rat!(a), rat!(0)],
                    [rat!(0), rat!(0), rat!(a)],
                ])
                .unwrap(),
            )
            .unwrap()
        };
        assert_eq!(cell(2).hexhash(), cell(2).hexhash());
        assert_ne!(cell(2).hexhash(), cell(3).hexhash());
    }

    #[test]
    fn test_cell_hash_ignores_rotation() {
        // Two bases describing the same lattice metric share a Niggli matrix.
        let a = Cell::from_basis(
            FracTensor::matrix3(&[
                [rat!(2), rat!(0), rat!(0)],
                [rat!(0), rat!(2), rat!(0)],
                [rat!(0), rat!(0), rat!(2)],
            ])
            .unwrap(),
        )
        .unwrap();
        let b = Cell::from_basis(
            FracTensor::matrix3(&[
                [rat!(0), rat!(2), rat!(0)],
                [rat!(0), rat!(0), rat!(2)],
                [rat!(2), rat!(0), rat!(0)],
            ])
            .unwrap(),
        )
        .unwrap();
        assert_eq!(a.hexhash(), b.hexhash());
    }

    #[test]
    fn test_tensor_tuple() {
        let t = FracTensor::from_coord_rows(&[
            [rat!(0), rat!(0), rat!(0)],
            [rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)],
        ])
        .unwrap();
        assert_eq!(tuple_to_string(&tensor_tuple(&t)), "\n0 0 0 \n1/2 1/2 1/2");
    }
}
