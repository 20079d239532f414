//! A crystallographic symmetry operation: an integer 3×3 rotation part and an exact
//! rational translation in `[0,1)³`, acting on fractional coordinates.

use std::fmt::Display;
use std::str::FromStr;

use crate::fract::Rational;
use crate::parsing;
use crate::tensor::TensorError;

/// One symmetry operation of a space group, `p ↦ R·p + t`. Translations are kept
/// canonicalized into `[0,1)` so that operation sets compare and hash deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymOp {
    pub rot: [[i8; 3]; 3],
    pub trans: [Rational; 3],
}

impl SymOp {
    pub fn identity() -> Self {
        Self {
            rot: [[1, 0, 0], [0, 1, 0], [0, 0, 1]],
            trans: [Rational::ZERO; 3],
        }
    }

    /// Builds from parts, normalizing each translation component into `[0,1)` and
    /// simplifying so equal operations are representation-equal.
    pub fn new(rot: [[i8; 3]; 3], trans: [Rational; 3]) -> Self {
        Self {
            rot,
            trans: trans.map(|t| t.normalize().simplify()),
        }
    }

    /// Applies the operation to a fractional coordinate. The image is *not* normalized;
    /// callers bring it back into the cell when membership is the question.
    pub fn apply(&self, p: &[Rational; 3]) -> Result<[Rational; 3], TensorError> {
        let mut out = [Rational::ZERO; 3];
        for i in 0..3 {
            let mut acc = self.trans[i];
            for j in 0..3 {
                let term = p[j].checked_mul(Rational::from(self.rot[i][j] as i128))?;
                acc = acc.checked_add(term)?;
            }
            out[i] = acc;
        }
        Ok(out)
    }

    /// Composition `self ∘ other` in the quotient by lattice translations: the rotation
    /// parts multiply and the combined translation is reduced modulo 1.
    pub fn compose(&self, other: &Self) -> Result<Self, TensorError> {
        let mut rot = [[0i8; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                let mut acc = 0i32;
                for k in 0..3 {
                    acc += self.rot[i][k] as i32 * other.rot[k][j] as i32;
                }
                rot[i][j] = acc as i8;
            }
        }
        let shifted = self.apply(&other.trans)?;
        Ok(Self::new(rot, shifted))
    }

    /// The translation shifted by a lattice vector, re-normalized. Used when composing
    /// centering translations onto a point operation.
    pub fn translated(&self, shift: &[Rational; 3]) -> Result<Self, TensorError> {
        let mut trans = [Rational::ZERO; 3];
        for i in 0..3 {
            trans[i] = self.trans[i].checked_add(shift[i])?;
        }
        Ok(Self::new(self.rot, trans))
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

impl FromStr for SymOp {
    type Err = TensorError;

    /// Parses a triplet like `x,y+1/2,-z`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parsing::parse_symop(s)
    }
}

impl Display for SymOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let vars = ['x', 'y', 'z'];
        for i in 0..3 {
            if i > 0 {
                write!(f, ",")?;
            }
            let mut wrote = false;
            for j in 0..3 {
                match self.rot[i][j] {
                    0 => {}
                    c => {
                        if c > 0 && wrote {
                            write!(f, "+")?;
                        } else if c < 0 {
                            write!(f, "-")?;
                        }
                        if c.abs() != 1 {
                            write!(f, "{}", c.abs())?;
                        }
                        write!(f, "{}", vars[j])?;
                        wrote = true;
                    }
                }
            }
            let t = self.trans[i].simplify();
            if t != Rational::ZERO {
                if wrote {
                    write!(f, "+")?;
                }
                write!(f, "{}", t)?;
                wrote = true;
            }
            if !wrote {
                write!(f, "0")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_apply() {
        let op: SymOp = "-y,x-y,z+1/3".parse().unwrap();
        let p = [rat!(1 / 4), rat!(1 / 2), rat!(0)];
        let img = op.apply(&p).unwrap();
        assert_eq!(img[0], rat!(-1) * rat!(1 / 2));
        assert_eq!(img[1], rat!(-1) * rat!(1 / 4));
        assert_eq!(img[2], rat!(1 / 3));
    }

    #[test]
    fn test_compose_inverse_pair() {
        let op: SymOp = "-x,-y,z+1/2".parse().unwrap();
        let twice = op.compose(&op).unwrap();
        assert!(twice.is_identity());
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["x,y,z", "-x,-y,z+1/2", "-y,x-y,z+1/3", "x-y,-y,-z", "y+3/4,x+1/4,z"] {
            let op: SymOp = s.parse().unwrap();
            let rendered = op.to_string();
            let reparsed: SymOp = rendered.parse().unwrap();
            assert_eq!(op, reparsed, "through {}", rendered);
        }
    }

    #[test]
    fn test_translation_normalized() {
        let op: SymOp = "x,y+3/2,-z-1/4".parse().unwrap();
        assert_eq!(op.trans[1], rat!(1 / 2));
        assert_eq!(op.trans[2], rat!(3 / 4));
    }
}
