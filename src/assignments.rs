//! Assignment of species mixtures to coordinate groups, plus the element data needed to
//! move between symbols and atomic numbers.

use phf::phf_map;
use thiserror::Error;

use crate::fract::{gcd, Rational};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("unknown element symbol: {0}")]
    UnknownElement(String),
    #[error("occupancy ratio outside [0, 1]")]
    BadRatio,
    #[error("occupancies of a site group sum above 1")]
    Oversubscribed,
}

/// Symbols indexed by atomic number; index 0 is the placeholder for unassigned slots.
pub const SYMBOLS: [&str; 119] = [
    "X", "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S",
    "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge",
    "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd",
    "In", "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd",
    "Tb", "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg",
    "Tl", "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm",
    "Bk", "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg",
    "Cn", "Nh", "Fl", "Mc", "Lv", "Ts", "Og",
];

static ATOMIC_NUMBERS: phf::Map<&'static str, u8> = phf_map! {
    "H" => 1, "He" => 2, "Li" => 3, "Be" => 4, "B" => 5, "C" => 6, "N" => 7, "O" => 8,
    "F" => 9, "Ne" => 10, "Na" => 11, "Mg" => 12, "Al" => 13, "Si" => 14, "P" => 15,
    "S" => 16, "Cl" => 17, "Ar" => 18, "K" => 19, "Ca" => 20, "Sc" => 21, "Ti" => 22,
    "V" => 23, "Cr" => 24, "Mn" => 25, "Fe" => 26, "Co" => 27, "Ni" => 28, "Cu" => 29,
    "Zn" => 30, "Ga" => 31, "Ge" => 32, "As" => 33, "Se" => 34, "Br" => 35, "Kr" => 36,
    "Rb" => 37, "Sr" => 38, "Y" => 39, "Zr" => 40, "Nb" => 41, "Mo" => 42, "Tc" => 43,
    "Ru" => 44, "Rh" => 45, "Pd" => 46, "Ag" => 47, "Cd" => 48, "In" => 49, "Sn" => 50,
    "Sb" => 51, "Te" => 52, "I" => 53, "Xe" => 54, "Cs" => 55, "Ba" => 56, "La" => 57,
    "Ce" => 58, "Pr" => 59, "Nd" => 60, "Pm" => 61, "Sm" => 62, "Eu" => 63, "Gd" => 64,
    "Tb" => 65, "Dy" => 66, "Ho" => 67, "Er" => 68, "Tm" => 69, "Yb" => 70, "Lu" => 71,
    "Hf" => 72, "Ta" => 73, "W" => 74, "Re" => 75, "Os" => 76, "Ir" => 77, "Pt" => 78,
    "Au" => 79, "Hg" => 80, "Tl" => 81, "Pb" => 82, "Bi" => 83, "Po" => 84, "At" => 85,
    "Rn" => 86, "Fr" => 87, "Ra" => 88, "Ac" => 89, "Th" => 90, "Pa" => 91, "U" => 92,
    "Np" => 93, "Pu" => 94, "Am" => 95, "Cm" => 96, "Bk" => 97, "Cf" => 98, "Es" => 99,
    "Fm" => 100, "Md" => 101, "No" => 102, "Lr" => 103, "Rf" => 104, "Db" => 105,
    "Sg" => 106, "Bh" => 107, "Hs" => 108, "Mt" => 109, "Ds" => 110, "Rg" => 111,
    "Cn" => 112, "Nh" => 113, "Fl" => 114, "Mc" => 115, "Lv" => 116, "Ts" => 117,
    "Og" => 118,
};

pub fn atomic_number(symbol: &str) -> Result<u8, AssignmentError> {
    ATOMIC_NUMBERS
        .get(symbol.trim())
        .copied()
        .ok_or_else(|| AssignmentError::UnknownElement(symbol.to_owned()))
}

pub fn symbol(atomic_number: u8) -> &'static str {
    SYMBOLS.get(atomic_number as usize).copied().unwrap_or("X")
}

/// One species occupying (part of) a site group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteOccupancy {
    pub atomic_number: u8,
    pub ratio: Rational,
}

/// The mixture of species on one coordinate group: fully occupied single species in the
/// common case, fractional occupancies summing to at most 1 otherwise.
pub type SpeciesMixture = Vec<SiteOccupancy>;

/// Species mixtures for every coordinate group, in group order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignments {
    groups: Vec<SpeciesMixture>,
}

impl Assignments {
    pub fn new(groups: Vec<SpeciesMixture>) -> Result<Self, AssignmentError> {
        for mixture in &groups {
            let mut total = Rational::ZERO;
            for occ in mixture {
                if occ.ratio < Rational::ZERO || occ.ratio > Rational::ONE {
                    return Err(AssignmentError::BadRatio);
                }
                total = total + occ.ratio;
            }
            if total > Rational::ONE {
                return Err(AssignmentError::Oversubscribed);
            }
        }
        Ok(Self { groups })
    }

    /// Fully-occupied single species per group.
    pub fn from_atomic_numbers(numbers: &[u8]) -> Self {
        Self {
            groups: numbers
                .iter()
                .map(|&z| vec![SiteOccupancy { atomic_number: z, ratio: Rational::ONE }])
                .collect(),
        }
    }

    pub fn from_symbols(symbols: &[&str]) -> Result<Self, AssignmentError> {
        let numbers =
            symbols.iter().map(|s| atomic_number(s)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_atomic_numbers(&numbers))
    }

    pub fn groups(&self) -> &[SpeciesMixture] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The dominant species symbol of each group, for codec output.
    pub fn group_symbols(&self) -> Vec<&'static str> {
        self.groups
            .iter()
            .map(|mixture| {
                mixture
                    .iter()
                    .max_by_key(|occ| occ.ratio)
                    .map(|occ| symbol(occ.atomic_number))
                    .unwrap_or("X")
            })
            .collect()
    }

    /// A reduced chemical formula over the given per-group atom counts, alphabetical by
    /// symbol, counts divided by their gcd and omitted when 1, e.g. `ClNa` for rock salt.
    pub fn formula(&self, group_counts: &[usize]) -> String {
        let mut totals: Vec<(String, i128)> = Vec::new();
        for (mixture, &count) in self.groups.iter().zip(group_counts) {
            for occ in mixture {
                let sym = symbol(occ.atomic_number).to_owned();
                match totals.iter_mut().find(|(s, _)| *s == sym) {
                    Some((_, n)) => *n += count as i128,
                    None => totals.push((sym, count as i128)),
                }
            }
        }
        totals.sort();
        let g = totals.iter().fold(0, |acc, (_, n)| gcd(acc, *n));
        let g = if g == 0 { 1 } else { g };
        let mut out = String::new();
        for (sym, n) in totals {
            out.push_str(&sym);
            if n / g != 1 {
                out.push_str(&(n / g).to_string());
            }
        }
        out
    }
}
