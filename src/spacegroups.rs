//! The spacegroup table: a read-only dataset keyed by Hall symbol, loaded once per
//! process from `data/spacegroups.sgt` and shared by reference ever after.
//!
//! Each entry carries the ITC number, setting, Hermann-Mauguin and Schoenflies symbols,
//! the complete symmetry operation list for the conventional cell (centering composed in
//! at load time), the Wyckoff positions, and a 64-bit hash of the operation set that lets
//! an unordered operation set be mapped back to its Hall symbol.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use thiserror::Error;

use crate::fract::Rational;
use crate::parsing::{parse_position_expr, parse_symop};
use crate::symop::SymOp;
use crate::tensor::{FracTensor, Shape, TensorError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpacegroupError {
    #[error("unknown Hall symbol or spacegroup designation: {0}")]
    UnknownHallSymbol(String),
}

/// The seven crystal systems, classified from the ITC number by fixed bucket ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrystalSystem {
    Triclinic,
    Monoclinic,
    Orthorhombic,
    Tetragonal,
    Trigonal,
    Hexagonal,
    Cubic,
}

impl CrystalSystem {
    pub fn from_itc_number(number: u16) -> Option<Self> {
        Some(match number {
            1..=2 => Self::Triclinic,
            3..=15 => Self::Monoclinic,
            16..=74 => Self::Orthorhombic,
            75..=142 => Self::Tetragonal,
            143..=167 => Self::Trigonal,
            168..=194 => Self::Hexagonal,
            195..=230 => Self::Cubic,
            _ => return None,
        })
    }
}

/// Centering translation sets, ITA Table 2.1.1.2.
pub fn centering_vectors(letter: char) -> Vec<[Rational; 3]> {
    let f0 = Rational::ZERO;
    let f12 = Rational::ONE_HALF;
    let f13 = Rational::new(1, 3);
    let f23 = Rational::new(2, 3);
    let mut vecs = vec![[f0, f0, f0]];
    match letter {
        'P' => {}
        'A' => vecs.push([f0, f12, f12]),
        'B' => vecs.push([f12, f0, f12]),
        'C' => vecs.push([f12, f12, f0]),
        'I' => vecs.push([f12, f12, f12]),
        'F' => {
            vecs.push([f0, f12, f12]);
            vecs.push([f12, f0, f12]);
            vecs.push([f12, f12, f0]);
        }
        'R' => {
            vecs.push([f23, f13, f13]);
            vecs.push([f13, f23, f23]);
        }
        _ => panic!("unknown centering letter {letter}"),
    }
    vecs
}

/// A Wyckoff orbit class: letter, multiplicity per conventional cell, and the
/// representative position expression with its parsed affine form.
#[derive(Debug, Clone)]
pub struct WyckoffPosition {
    pub letter: char,
    pub multiplicity: u32,
    pub expr: String,
    /// Which of x, y, z are free parameters of the position.
    pub freedom: [bool; 3],
    coefs: [[i8; 3]; 3],
    consts: [Rational; 3],
}

impl WyckoffPosition {
    fn parse(letter: char, multiplicity: u32, expr: &str) -> Result<Self, TensorError> {
        let (coefs, consts) = parse_position_expr(expr)?;
        let mut freedom = [false; 3];
        for row in &coefs {
            for (v, &c) in row.iter().enumerate() {
                if c != 0 {
                    freedom[v] = true;
                }
            }
        }
        Ok(Self { letter, multiplicity, expr: expr.to_owned(), freedom, coefs, consts })
    }

    /// The affine 3×4 expansion matrix mapping `(x, y, z, 1)` to the position.
    pub fn affine(&self) -> FracTensor {
        let mut values = Vec::with_capacity(12);
        for i in 0..3 {
            for v in 0..3 {
                values.push(Rational::from(self.coefs[i][v] as i128));
            }
            values.push(self.consts[i]);
        }
        FracTensor::from_rationals(Shape::Matrix(3, 4), &values)
            .expect("wyckoff affine matrix is well-formed")
    }

    /// Evaluates the position for given free-parameter values.
    pub fn position(&self, vars: &[Rational; 3]) -> Result<[Rational; 3], TensorError> {
        let mut out = [Rational::ZERO; 3];
        for i in 0..3 {
            let mut acc = self.consts[i];
            for v in 0..3 {
                if self.coefs[i][v] != 0 {
                    acc = acc
                        .checked_add(vars[v].checked_mul(Rational::from(self.coefs[i][v] as i128))?)?;
                }
            }
            out[i] = acc;
        }
        Ok(out)
    }

    /// Whether a coordinate fits this position's fixed-coordinate pattern (modulo 1),
    /// for some choice of the free parameters.
    pub fn matches(&self, coord: &[Rational; 3]) -> bool {
        let mut vars: [Option<Rational>; 3] = [None; 3];
        // Solve axes with a single unassigned variable until nothing changes.
        for _ in 0..3 {
            for i in 0..3 {
                let mut unassigned = None;
                let mut residual = coord[i] - self.consts[i];
                let mut solvable = true;
                for v in 0..3 {
                    if self.coefs[i][v] == 0 {
                        continue;
                    }
                    match vars[v] {
                        Some(value) => {
                            residual = residual - value * Rational::from(self.coefs[i][v] as i128);
                        }
                        None => {
                            if unassigned.is_some() {
                                solvable = false;
                            }
                            unassigned = Some(v);
                        }
                    }
                }
                if let (true, Some(v)) = (solvable, unassigned) {
                    vars[v] = Some(residual / Rational::from(self.coefs[i][v] as i128));
                }
            }
        }
        for i in 0..3 {
            let mut acc = self.consts[i];
            for v in 0..3 {
                if self.coefs[i][v] != 0 {
                    let Some(value) = vars[v] else {
                        return false;
                    };
                    acc = acc + value * Rational::from(self.coefs[i][v] as i128);
                }
            }
            if (acc - coord[i]).normalize() != Rational::ZERO {
                return false;
            }
        }
        true
    }
}

/// One spacegroup description: a Hall symbol plus everything the engine needs to act on it.
#[derive(Debug, Clone)]
pub struct SpacegroupEntry {
    pub hall: String,
    pub number: u16,
    pub setting: String,
    pub hm: String,
    pub schoenflies: String,
    pub symops: Vec<SymOp>,
    pub wyckoffs: Vec<WyckoffPosition>,
    pub symops_hash: u64,
}

impl SpacegroupEntry {
    pub fn crystal_system(&self) -> CrystalSystem {
        CrystalSystem::from_itc_number(self.number).expect("table numbers are 1..=230")
    }

    pub fn wyckoff(&self, letter: char) -> Option<&WyckoffPosition> {
        self.wyckoffs.iter().find(|w| w.letter == letter)
    }

    /// The general position: by dataset convention the last Wyckoff entry.
    pub fn general_position(&self) -> &WyckoffPosition {
        self.wyckoffs.last().expect("every entry has at least one wyckoff position")
    }

    /// The centering letter of the Hall symbol, `P`/`A`/`B`/`C`/`I`/`R`/`F`.
    pub fn centering_letter(&self) -> char {
        self.hall.trim_start_matches('-').chars().next().expect("hall symbols are nonempty")
    }

    /// The lattice system; trigonal groups split into rhombohedral and hexagonal by the
    /// centering letter.
    pub fn lattice_system(&self) -> &'static str {
        match self.crystal_system() {
            CrystalSystem::Triclinic => "triclinic",
            CrystalSystem::Monoclinic => "monoclinic",
            CrystalSystem::Orthorhombic => "orthorhombic",
            CrystalSystem::Tetragonal => "tetragonal",
            CrystalSystem::Trigonal => {
                if self.centering_letter() == 'R' {
                    "rhombohedral"
                } else {
                    "hexagonal"
                }
            }
            CrystalSystem::Hexagonal => "hexagonal",
            CrystalSystem::Cubic => "cubic",
        }
    }

    /// The lattice kind named by the centering letter.
    pub fn lattice_kind(&self) -> &'static str {
        match self.centering_letter() {
            'P' => "primitive",
            'I' => "body-centered",
            'F' => "face-centered",
            'A' | 'B' | 'C' => "base-centered",
            'R' => "rhombohedral",
            other => panic!("unknown centering letter {other}"),
        }
    }
}

/// The process-wide spacegroup table.
#[derive(Debug)]
pub struct SpacegroupTable {
    entries: Vec<SpacegroupEntry>,
    by_hall: BTreeMap<String, usize>,
    by_hash: HashMap<u64, usize>,
    distinct_ops: Vec<SymOp>,
}

static TABLE: OnceLock<SpacegroupTable> = OnceLock::new();

/// The shared table, parsed from the embedded dataset on first use.
pub fn table() -> &'static SpacegroupTable {
    TABLE.get_or_init(|| {
        SpacegroupTable::parse(include_str!("../data/spacegroups.sgt"))
            .expect("embedded spacegroup dataset is well-formed")
    })
}

impl SpacegroupTable {
    pub fn entries(&self) -> impl Iterator<Item = &SpacegroupEntry> {
        self.entries.iter()
    }

    /// Hall-symbol lookup. Input is normalized the way free-form designations arrive:
    /// trimmed, underscores as spaces, canonical capitalization.
    pub fn lookup(&self, hall: &str) -> Result<&SpacegroupEntry, SpacegroupError> {
        let key = normalize_hall(hall);
        self.by_hall
            .get(&key)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| SpacegroupError::UnknownHallSymbol(hall.to_owned()))
    }

    pub fn by_itc_number(
        &self,
        number: u16,
        setting: Option<&str>,
    ) -> Result<&SpacegroupEntry, SpacegroupError> {
        self.entries
            .iter()
            .find(|e| {
                e.number == number && setting.map(|s| s.trim() == e.setting).unwrap_or(true)
            })
            .ok_or_else(|| {
                SpacegroupError::UnknownHallSymbol(format!(
                    "itc {number} setting {}",
                    setting.unwrap_or("(any)")
                ))
            })
    }

    pub fn by_hm(
        &self,
        hm: &str,
        setting: Option<&str>,
    ) -> Result<&SpacegroupEntry, SpacegroupError> {
        let key: String = hm.trim().chars().filter(|c| !c.is_whitespace()).collect();
        self.entries
            .iter()
            .find(|e| e.hm == key && setting.map(|s| s.trim() == e.setting).unwrap_or(true))
            .ok_or_else(|| SpacegroupError::UnknownHallSymbol(hm.to_owned()))
    }

    /// Identifies a Hall symbol from an unordered operation set via the operation-set hash.
    pub fn by_symops(&self, ops: &[SymOp]) -> Result<&SpacegroupEntry, SpacegroupError> {
        let hash = symops_set_hash(ops);
        self.by_symops_hash(hash)
            .ok_or_else(|| SpacegroupError::UnknownHallSymbol(format!("symops hash {hash:#x}")))
    }

    pub fn by_symops_hash(&self, hash: u64) -> Option<&SpacegroupEntry> {
        self.by_hash.get(&hash).map(|&i| &self.entries[i])
    }

    /// Every distinct operation appearing anywhere in the table, in canonical
    /// `(rot, trans)` order. This is the candidate set the symmetry search walks.
    pub fn distinct_ops(&self) -> &[SymOp] {
        &self.distinct_ops
    }

    /// Resolves a free-form spacegroup designation: a Hall symbol, an ITC number
    /// (optionally `number:setting`), a Hermann-Mauguin symbol, or a Schoenflies
    /// symbol, tried in that order.
    pub fn resolve(&self, designation: &str) -> Result<&SpacegroupEntry, SpacegroupError> {
        let designation = designation.trim();
        if let Ok(entry) = self.lookup(designation) {
            return Ok(entry);
        }
        let (head, setting) = match designation.split_once(':') {
            Some((h, s)) => (h.trim(), Some(s.trim())),
            None => (designation, None),
        };
        if let Ok(number) = head.parse::<u16>() {
            if let Ok(entry) = self.by_itc_number(number, setting) {
                return Ok(entry);
            }
        }
        if let Ok(entry) = self.by_hm(head, setting) {
            return Ok(entry);
        }
        if let Some(entry) = self.entries.iter().find(|e| e.schoenflies == head) {
            return Ok(entry);
        }
        Err(SpacegroupError::UnknownHallSymbol(designation.to_owned()))
    }

    fn parse(data: &str) -> Result<Self, String> {
        let mut entries = Vec::new();
        let mut block: Vec<(&str, &str)> = Vec::new();
        let mut lines = data.lines().chain(std::iter::once(""));
        loop {
            let Some(line) = lines.next() else {
                break;
            };
            let line = line.trim_end();
            if line.starts_with('#') {
                continue;
            }
            if line.trim().is_empty() {
                if !block.is_empty() {
                    entries.push(Self::parse_entry(&block)?);
                    block.clear();
                }
                continue;
            }
            let (key, value) =
                line.split_once(':').ok_or_else(|| format!("malformed dataset line: {line}"))?;
            block.push((key.trim(), value.trim()));
        }
        if !block.is_empty() {
            entries.push(Self::parse_entry(&block)?);
        }

        let mut by_hall = BTreeMap::new();
        let mut by_hash = HashMap::new();
        let mut all_ops = BTreeSet::new();
        for (i, e) in entries.iter().enumerate() {
            if by_hall.insert(e.hall.clone(), i).is_some() {
                return Err(format!("duplicate hall symbol {}", e.hall));
            }
            if by_hash.insert(e.symops_hash, i).is_some() {
                return Err(format!("operation-set hash collision at {}", e.hall));
            }
            all_ops.extend(e.symops.iter().cloned());
        }
        Ok(Self { entries, by_hall, by_hash, distinct_ops: all_ops.into_iter().collect() })
    }

    fn parse_entry(block: &[(&str, &str)]) -> Result<SpacegroupEntry, String> {
        let get = |key: &str| {
            block
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| *v)
                .ok_or_else(|| format!("dataset entry missing {key}"))
        };
        let hall = get("hall")?.to_owned();
        let number: u16 =
            get("itc")?.parse().map_err(|_| format!("bad itc number in {hall}"))?;
        let setting = get("setting").unwrap_or("").to_owned();
        let hm = get("hm")?.to_owned();
        let schoenflies = get("schoenflies")?.to_owned();
        let centering = get("centering")?
            .chars()
            .next()
            .ok_or_else(|| format!("empty centering in {hall}"))?;

        let shifts = centering_vectors(centering);
        let mut ops = BTreeSet::new();
        for (key, value) in block {
            if *key != "symop" {
                continue;
            }
            let op = parse_symop(value).map_err(|e| format!("bad symop in {hall}: {e}"))?;
            for shift in &shifts {
                let shifted =
                    op.translated(shift).map_err(|e| format!("bad symop in {hall}: {e}"))?;
                ops.insert(shifted);
            }
        }
        if ops.is_empty() {
            return Err(format!("no symops in {hall}"));
        }
        let symops: Vec<SymOp> = ops.into_iter().collect();
        let symops_hash = symops_set_hash(&symops);

        let mut wyckoffs = Vec::new();
        for (key, value) in block {
            if *key != "wyckoff" {
                continue;
            }
            let mut parts = value.split_whitespace();
            let letter = parts
                .next()
                .and_then(|s| s.chars().next())
                .ok_or_else(|| format!("bad wyckoff line in {hall}"))?;
            let multiplicity: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| format!("bad wyckoff multiplicity in {hall}"))?;
            let expr = parts.next().ok_or_else(|| format!("bad wyckoff expr in {hall}"))?;
            wyckoffs.push(
                WyckoffPosition::parse(letter, multiplicity, expr)
                    .map_err(|e| format!("bad wyckoff expr in {hall}: {e}"))?,
            );
        }
        if wyckoffs.is_empty() {
            return Err(format!("no wyckoff positions in {hall}"));
        }

        Ok(SpacegroupEntry { hall, number, setting, hm, schoenflies, symops, wyckoffs, symops_hash })
    }
}

fn normalize_hall(hall: &str) -> String {
    let s = hall.trim().replace('_', " ");
    let (neg, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.as_str()),
    };
    let mut out = String::new();
    if neg {
        out.push('-');
    }
    let mut chars = rest.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.extend(chars.flat_map(|c| c.to_lowercase()));
    }
    out
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = FNV_OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn rot_hash(rot: &[[i8; 3]; 3]) -> u64 {
    let bytes: Vec<u8> = rot.iter().flatten().map(|&v| v as u8).collect();
    fnv1a(&bytes)
}

fn trans_hash(trans: &[Rational; 3]) -> u64 {
    let mut bytes = Vec::with_capacity(96);
    for t in trans {
        let t = t.simplify();
        bytes.extend_from_slice(&t.numer().to_le_bytes());
        bytes.extend_from_slice(&t.denom().to_le_bytes());
    }
    fnv1a(&bytes)
}

/// The order-independent 64-bit hash of an operation set: the hash of the sorted sequence
/// of per-operation `(rotation hash, translation hash)` pairs.
pub fn symops_set_hash(ops: &[SymOp]) -> u64 {
    let mut pairs: Vec<(u64, u64)> =
        ops.iter().map(|op| (rot_hash(&op.rot), trans_hash(&op.trans))).collect();
    pairs.sort_unstable();
    pairs.dedup();
    let mut bytes = Vec::with_capacity(pairs.len() * 16);
    for (r, t) in pairs {
        bytes.extend_from_slice(&r.to_le_bytes());
        bytes.extend_from_slice(&t.to_le_bytes());
    }
    fnv1a(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_table_loads() {
        let t = table();
        assert!(t.entries().count() >= 16);
    }

    #[test]
    fn test_group_orders() {
        let expected = [
            ("P 1", 1),
            ("-P 1", 2),
            ("C 2y", 4),
            ("-C 2y", 8),
            ("-P 2ybc", 4),
            ("-P 2 2", 8),
            ("-P 2ac 2n", 8),
            ("P 4 -2", 8),
            ("-P 4 2", 16),
            ("-R 3 2\"", 36),
            ("-P 6 2", 24),
            ("-P 6c 2c", 24),
            ("-P 2 2 3", 24),
            ("-P 4 2 3", 48),
            ("-F 4 2 3", 192),
            ("-I 4 2 3", 96),
        ];
        for (hall, order) in expected {
            let entry = table().lookup(hall).unwrap();
            assert_eq!(entry.symops.len(), order, "order of {hall}");
        }
    }

    #[test]
    fn test_resolve_designations() {
        assert_eq!(table().resolve("-F 4 2 3").unwrap().number, 225);
        assert_eq!(table().resolve("225").unwrap().hall, "-F 4 2 3");
        assert_eq!(table().resolve("14:b1").unwrap().hall, "-P 2ybc");
        assert_eq!(table().resolve("Pnma").unwrap().number, 62);
        assert_eq!(table().resolve("Oh^5").unwrap().number, 225);
        assert!(table().resolve("nonsense").is_err());
    }

    #[test]
    fn test_every_op_set_is_closed() {
        for entry in table().entries() {
            let set: std::collections::HashSet<&SymOp> = entry.symops.iter().collect();
            for a in &entry.symops {
                for b in &entry.symops {
                    let c = a.compose(b).unwrap();
                    assert!(
                        set.contains(&c),
                        "{}: {} ∘ {} = {} escapes the set",
                        entry.hall,
                        a,
                        b,
                        c
                    );
                }
            }
        }
    }

    #[test]
    fn test_by_symops_recovers_every_hall() {
        for entry in table().entries() {
            // Feed the ops back in reversed order; the set hash must not care.
            let mut ops = entry.symops.clone();
            ops.reverse();
            let found = table().by_symops(&ops).unwrap();
            assert_eq!(found.hall, entry.hall);
        }
    }

    #[test]
    fn test_lookup_normalization() {
        assert_eq!(table().lookup("-f 4 2 3").unwrap().number, 225);
        assert_eq!(table().lookup("P_1").unwrap().number, 1);
        assert!(table().lookup("-Q 9").is_err());
    }

    #[test]
    fn test_by_number_and_hm() {
        assert_eq!(table().by_itc_number(225, None).unwrap().hall, "-F 4 2 3");
        assert_eq!(table().by_itc_number(14, Some("b1")).unwrap().hall, "-P 2ybc");
        assert_eq!(table().by_hm("Fm-3m", None).unwrap().number, 225);
        assert_eq!(table().by_hm("P 6/m m m", None).unwrap().number, 191);
        assert!(table().by_hm("Xyzzy", None).is_err());
    }

    #[test]
    fn test_crystal_system_buckets() {
        assert_eq!(CrystalSystem::from_itc_number(1), Some(CrystalSystem::Triclinic));
        assert_eq!(CrystalSystem::from_itc_number(14), Some(CrystalSystem::Monoclinic));
        assert_eq!(CrystalSystem::from_itc_number(62), Some(CrystalSystem::Orthorhombic));
        assert_eq!(CrystalSystem::from_itc_number(123), Some(CrystalSystem::Tetragonal));
        assert_eq!(CrystalSystem::from_itc_number(166), Some(CrystalSystem::Trigonal));
        assert_eq!(CrystalSystem::from_itc_number(191), Some(CrystalSystem::Hexagonal));
        assert_eq!(CrystalSystem::from_itc_number(230), Some(CrystalSystem::Cubic));
        assert_eq!(CrystalSystem::from_itc_number(231), None);
    }

    #[test]
    fn test_lattice_classification() {
        let fm3m = table().lookup("-F 4 2 3").unwrap();
        assert_eq!(fm3m.lattice_kind(), "face-centered");
        assert_eq!(fm3m.lattice_system(), "cubic");
        let r3m = table().lookup("-R 3 2\"").unwrap();
        assert_eq!(r3m.lattice_kind(), "rhombohedral");
        // Trigonal with R centering classifies rhombohedral.
        assert_eq!(r3m.lattice_system(), "rhombohedral");
    }

    #[test]
    fn test_wyckoff_matching() {
        let fm3m = table().lookup("-F 4 2 3").unwrap();
        let a = fm3m.wyckoff('a').unwrap();
        assert!(a.matches(&[rat!(0), rat!(0), rat!(0)]));
        assert!(!a.matches(&[rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)]));
        let b = fm3m.wyckoff('b').unwrap();
        assert!(b.matches(&[rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)]));
        let e = fm3m.wyckoff('e').unwrap();
        assert!(e.matches(&[rat!(1 / 5), rat!(0), rat!(0)]));
        assert!(!e.matches(&[rat!(1 / 5), rat!(1 / 5), rat!(0)]));
        assert_eq!(e.freedom, [true, false, false]);
        let general = fm3m.general_position();
        assert_eq!(general.letter, 'l');
        assert!(general.matches(&[rat!(1 / 7), rat!(2 / 7), rat!(3 / 7)]));
    }

    #[test]
    fn test_wyckoff_affine() {
        let p194 = table().lookup("-P 6c 2c").unwrap();
        let h = p194.wyckoff('h').unwrap();
        let pos = h.position(&[rat!(1 / 5), rat!(0), rat!(0)]).unwrap();
        assert_eq!(pos, [rat!(1 / 5), rat!(2 / 5), rat!(1 / 4)]);
        assert_eq!(h.affine().shape(), Shape::Matrix(3, 4));
    }
}
