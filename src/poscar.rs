//! The POSCAR plain-text codec: the lattice/atoms format used by plane-wave codes.
//!
//! Parsing recovers exact rationals from the decimal text (`0.3333333333333333333`
//! becomes 1/3, not a float); writing prints 19 decimal places so that any coordinate
//! with denominator up to 1e9 survives a round trip bit-exactly.

use std::io::{BufRead, Write};
use std::path::Path;

use log::debug;
use num_traits::Signed;
use thiserror::Error;

use crate::assignments::{atomic_number, AssignmentError, Assignments};
use crate::cell::{Cell, CellError};
use crate::fileio::AtomicFile;
use crate::fract::Rational;
use crate::parsing::{default_min_accuracy, parse_decimal};
use crate::sites::{SitesError, UnitcellSites};
use crate::structure::{Structure, StructureError};
use crate::tensor::{FracTensor, TensorError};

#[derive(Debug, Error)]
pub enum PoscarError {
    #[error("{path}: {source}")]
    File {
        path: String,
        #[source]
        source: Box<PoscarError>,
    },
    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Cell(#[from] CellError),
    #[error(transparent)]
    Sites(#[from] SitesError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error(transparent)]
    Structure(#[from] StructureError),
}

fn parse_err(line: usize, reason: impl Into<String>) -> PoscarError {
    PoscarError::Parse { line, reason: reason.into() }
}

/// The second line: a positive isotropic scale, or (written negative) an absolute volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scale {
    Factor(Rational),
    Volume(Rational),
}

/// Coordinates as they appear in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordsKind {
    Direct(FracTensor),
    Cartesian(FracTensor),
}

/// A parsed POSCAR file, structurally faithful to the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poscar {
    pub comment: String,
    pub scale: Scale,
    /// Unscaled basis rows, exactly as written.
    pub basis: FracTensor,
    pub species: Option<Vec<String>>,
    pub counts: Vec<usize>,
    pub selective_dynamics: bool,
    pub coords: CoordsKind,
}

impl Poscar {
    pub fn from_reader(reader: impl BufRead) -> Result<Self, PoscarError> {
        let mut lines = reader.lines().enumerate();
        let mut next_line = || -> Result<(usize, String), PoscarError> {
            match lines.next() {
                Some((i, Ok(text))) => Ok((i + 1, text)),
                Some((i, Err(e))) => Err(parse_err(i + 1, e.to_string())),
                None => Err(parse_err(0, "unexpected end of file")),
            }
        };
        let acc = Some(default_min_accuracy());

        let (_, comment) = next_line()?;
        let comment = comment.trim().to_owned();

        let (ln, scale_line) = next_line()?;
        let scale_value = parse_decimal(scale_line.trim(), acc)
            .map_err(|e| parse_err(ln, format!("bad scale: {e}")))?;
        let scale = if scale_value < Rational::ZERO {
            Scale::Volume(scale_value.abs())
        } else if scale_value > Rational::ZERO {
            Scale::Factor(scale_value)
        } else {
            return Err(parse_err(ln, "scale must be non-zero"));
        };

        let mut basis_rows = [[Rational::ZERO; 3]; 3];
        for row in &mut basis_rows {
            let (ln, text) = next_line()?;
            let tokens: Vec<&str> = text.split_whitespace().collect();
            if tokens.len() < 3 {
                return Err(parse_err(ln, "basis row needs three components"));
            }
            for (j, tok) in tokens[..3].iter().enumerate() {
                row[j] = parse_decimal(tok, acc)
                    .map_err(|e| parse_err(ln, format!("bad basis component {tok}: {e}")))?;
            }
        }
        let basis = FracTensor::matrix3(&basis_rows)?;

        let (ln, symbols_or_counts) = next_line()?;
        let tokens: Vec<String> =
            symbols_or_counts.split_whitespace().map(str::to_owned).collect();
        if tokens.is_empty() {
            return Err(parse_err(ln, "expected species symbols or counts"));
        }
        let (species, counts) = match tokens
            .iter()
            .map(|t| t.parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(counts) => (None, counts),
            Err(_) => {
                let (ln2, counts_line) = next_line()?;
                let counts = counts_line
                    .split_whitespace()
                    .map(|t| t.parse::<usize>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| parse_err(ln2, "bad atom counts"))?;
                (Some(tokens), counts)
            }
        };
        if let Some(symbols) = &species {
            if symbols.len() != counts.len() {
                return Err(parse_err(ln, "species and counts lines disagree"));
            }
        }
        let total: usize = counts.iter().sum();

        let (ln, marker) = next_line()?;
        let (selective_dynamics, coord_marker, marker_line) =
            match marker.trim().chars().next() {
                Some('S') | Some('s') => {
                    let (ln2, m2) = next_line()?;
                    (true, m2.trim().to_owned(), ln2)
                }
                _ => (false, marker.trim().to_owned(), ln),
            };
        let cartesian = match coord_marker.chars().next() {
            Some('D') | Some('d') => false,
            Some('C') | Some('c') | Some('K') | Some('k') => true,
            _ => {
                return Err(parse_err(
                    marker_line,
                    format!("unrecognized coordinate marker {coord_marker:?}"),
                ))
            }
        };

        let mut rows: Vec<[Rational; 3]> = Vec::with_capacity(total);
        for _ in 0..total {
            let (ln, text) = next_line()?;
            let tokens: Vec<&str> = text.split_whitespace().collect();
            if tokens.len() < 3 {
                return Err(parse_err(ln, "coordinate row needs three components"));
            }
            let mut row = [Rational::ZERO; 3];
            for (j, tok) in tokens[..3].iter().enumerate() {
                row[j] = parse_decimal(tok, acc)
                    .map_err(|e| parse_err(ln, format!("bad coordinate {tok}: {e}")))?;
            }
            rows.push(row);
        }
        let tensor = FracTensor::from_coord_rows(&rows)?;
        let coords = if cartesian { CoordsKind::Cartesian(tensor) } else { CoordsKind::Direct(tensor) };

        Ok(Self { comment, scale, basis, species, counts, selective_dynamics, coords })
    }

    pub fn from_str_input(text: &str) -> Result<Self, PoscarError> {
        Self::from_reader(text.as_bytes())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PoscarError> {
        let path = path.as_ref();
        let wrap = |e: PoscarError| PoscarError::File {
            path: path.display().to_string(),
            source: Box::new(e),
        };
        let file = std::fs::File::open(path).map_err(|e| wrap(e.into()))?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(wrap)
    }

    pub fn to_writer(&self, w: &mut impl Write) -> Result<(), PoscarError> {
        writeln!(w, "{}", self.comment)?;
        match &self.scale {
            Scale::Factor(s) => writeln!(w, "{}", s.to_decimal_string(16))?,
            Scale::Volume(v) => writeln!(w, "-{}", v.to_decimal_string(16))?,
        }
        for i in 0..3 {
            let row = self.basis.row(i);
            writeln!(
                w,
                "{} {} {}",
                row.get1(0).to_decimal_string(19),
                row.get1(1).to_decimal_string(19),
                row.get1(2).to_decimal_string(19),
            )?;
        }
        if let Some(species) = &self.species {
            writeln!(w, "{}", species.join(" "))?;
        }
        let counts: Vec<String> = self.counts.iter().map(usize::to_string).collect();
        writeln!(w, "{}", counts.join(" "))?;
        let coords = match &self.coords {
            CoordsKind::Direct(t) => {
                writeln!(w, "Direct")?;
                t
            }
            CoordsKind::Cartesian(t) => {
                writeln!(w, "Cartesian")?;
                t
            }
        };
        for row in coords.coord_rows() {
            writeln!(
                w,
                "{} {} {}",
                row[0].to_decimal_string(19),
                row[1].to_decimal_string(19),
                row[2].to_decimal_string(19),
            )?;
        }
        Ok(())
    }

    pub fn to_string_output(&self) -> Result<String, PoscarError> {
        let mut out = Vec::new();
        self.to_writer(&mut out)?;
        Ok(String::from_utf8(out).expect("poscar output is utf-8"))
    }

    /// Atomic file write: sibling path, fsync, rename.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), PoscarError> {
        let path = path.as_ref();
        let wrap = |e: PoscarError| PoscarError::File {
            path: path.display().to_string(),
            source: Box::new(e),
        };
        let mut af = AtomicFile::create(path).map_err(|e| wrap(e.into()))?;
        self.to_writer(&mut af.writer()).map_err(wrap)?;
        af.commit().map_err(|e| wrap(e.into()))
    }

    /// Interprets the file as a unit-cell structure: scale applied to the basis,
    /// cartesian coordinates converted through the basis, species resolved to atomic
    /// numbers (slot placeholders when the file names none), the comment kept as a tag.
    pub fn to_structure(&self) -> Result<Structure, PoscarError> {
        let scaled = match &self.scale {
            Scale::Factor(f) => self.basis.scale(*f)?,
            Scale::Volume(v) => {
                // An absolute volume rarely has an exact rational scale; the best
                // 1e-9-resolution approximation keeps downstream arithmetic exact.
                let cell = Cell::from_basis(self.basis.clone())?;
                let scale_f = cell.scale_from_volume(v.to_f64())?;
                let scale = Rational::new((scale_f * 1e9).round() as i128, 1_000_000_000)
                    .limit_denominator(1_000_000_000);
                self.basis.scale(scale)?
            }
        };
        let cell = Cell::from_basis(scaled)?;

        let direct = match &self.coords {
            CoordsKind::Direct(t) => t.clone(),
            // Fractional positions are cartesian · B⁻¹; the isotropic scale cancels.
            CoordsKind::Cartesian(t) => t.mul(&self.basis.inv()?)?,
        };
        let sites = UnitcellSites::new(direct, self.counts.clone())?;

        let assignments = match &self.species {
            Some(symbols) => {
                let numbers = symbols
                    .iter()
                    .map(|s| atomic_number(s))
                    .collect::<Result<Vec<_>, _>>()?;
                Assignments::from_atomic_numbers(&numbers)
            }
            // Pre-VASP-5 files carry no symbols; keep placeholder slots.
            None => Assignments::from_atomic_numbers(&vec![0; self.counts.len()]),
        };

        debug!("poscar: {} atoms in {} groups", sites.total_sites(), self.counts.len());
        Ok(Structure::from_unitcell(cell, sites, assignments)?.with_tag("comment", &self.comment))
    }

    /// Renders a structure's unit cell. With `fix_negative_determinant`, a left-handed
    /// basis is negated together with the coordinates so physical positions survive
    /// while the orientation becomes positive.
    pub fn from_structure(
        structure: &Structure,
        fix_negative_determinant: bool,
    ) -> Result<Self, PoscarError> {
        let canonical = structure.clone().canonicalized()?;
        let uc = canonical.unitcell().expect("canonicalized structure has a unit cell");

        let mut basis = uc.cell.basis().clone();
        let mut coords = uc.sites.coords().clone();
        if fix_negative_determinant && uc.cell.orientation() < 0 {
            basis = basis.neg();
            coords = coords.neg().normalize();
        }

        let comment = {
            let hash = canonical.hexhash()?;
            let mut c = format!("{} {}", canonical.formula(), hash);
            for (k, v) in canonical.tags() {
                if k != "comment" {
                    c.push_str(&format!(" {k}:{v}"));
                }
            }
            c
        };

        Ok(Self {
            comment,
            scale: Scale::Factor(Rational::ONE),
            basis,
            species: Some(
                canonical.assignments().group_symbols().iter().map(|s| s.to_string()).collect(),
            ),
            counts: uc.sites.counts().to_vec(),
            selective_dynamics: false,
            coords: CoordsKind::Direct(coords),
        })
    }
}

/// The recommended k-point grid for a basis at a linear density: for each reciprocal
/// vector, `N = max(1, ⌈|b*|·density + ½⌉)`.
pub fn recommend_kpoints(cell: &Cell, density: f64) -> Result<[usize; 3], PoscarError> {
    let recip = cell.reciprocal()?.simplify();
    let mut out = [1usize; 3];
    for i in 0..3 {
        let len = recip.row(i).lengthsqr()?.to_f64().sqrt();
        let n = ((len * density + 0.5).ceil() + 0.1) as usize;
        out[i] = n.max(1);
    }
    Ok(out)
}

/// Writes a KPOINTS file with a Monkhorst-Pack or Gamma-centered header.
pub fn write_kpoints_file(
    w: &mut impl Write,
    kpoints: [usize; 3],
    comment: &str,
    gamma_centered: bool,
) -> Result<(), PoscarError> {
    writeln!(w, "{comment}")?;
    writeln!(w, "0")?;
    if gamma_centered {
        writeln!(w, "Gamma")?;
    } else {
        writeln!(w, "Monkhorst-Pack")?;
    }
    writeln!(w, "{} {} {}", kpoints[0], kpoints[1], kpoints[2])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat;

    use pretty_assertions::assert_eq;

    const CU_POSCAR: &str = "\
Cu2
1.0
2.0 0.0 0.0
0.0 2.0 0.0
0.0 0.0 2.0
Cu
2
Direct
0.0 0.0 0.0
0.5 0.5 0.5
";

    #[test]
    fn test_parse_cu() {
        let poscar = Poscar::from_str_input(CU_POSCAR).unwrap();
        assert_eq!(poscar.comment, "Cu2");
        assert_eq!(poscar.scale, Scale::Factor(rat!(1)));
        assert_eq!(poscar.counts, vec![2]);
        assert_eq!(poscar.species, Some(vec!["Cu".to_owned()]));
        let CoordsKind::Direct(coords) = &poscar.coords else {
            panic!("expected direct coordinates");
        };
        assert_eq!(coords.get2(1, 0), rat!(1 / 2));
    }

    #[test]
    fn test_roundtrip_preserves_structure_and_hash() {
        let parsed = Poscar::from_str_input(CU_POSCAR).unwrap().to_structure().unwrap();
        let emitted = Poscar::from_structure(&parsed, false).unwrap().to_string_output().unwrap();
        let reparsed = Poscar::from_str_input(&emitted).unwrap().to_structure().unwrap();

        let uc1 = parsed.unitcell().unwrap();
        let uc2 = reparsed.unitcell().unwrap();
        assert_eq!(uc1.cell, uc2.cell);
        assert_eq!(uc1.sites.sorted().unwrap(), uc2.sites.sorted().unwrap());
        assert_eq!(parsed.assignments(), reparsed.assignments());
        assert_eq!(parsed.hexhash().unwrap(), reparsed.hexhash().unwrap());
    }

    #[test]
    fn test_thirds_roundtrip() {
        let text = "\
hex layer
1.0
2.0 0.0 0.0
-1.0 1.7320508075688773 0.0
0.0 0.0 3.0
C
3
Direct
0.0 0.0 0.0
0.3333333333333333333 0.6666666666666666667 0.0
0.6666666666666666667 0.3333333333333333333 0.0
";
        let poscar = Poscar::from_str_input(text).unwrap();
        let CoordsKind::Direct(coords) = &poscar.coords else {
            panic!("expected direct coordinates");
        };
        assert_eq!(coords.get2(1, 0), rat!(1 / 3));
        assert_eq!(coords.get2(1, 1), rat!(2 / 3));

        let emitted = poscar.to_string_output().unwrap();
        let reparsed = Poscar::from_str_input(&emitted).unwrap();
        let CoordsKind::Direct(coords2) = &reparsed.coords else {
            panic!("expected direct coordinates");
        };
        assert_eq!(coords, coords2);
    }

    #[test]
    fn test_negative_volume_line() {
        let text = "\
vol form
-8.0
1.0 0.0 0.0
0.0 1.0 0.0
0.0 0.0 1.0
Cu
1
Direct
0.0 0.0 0.0
";
        let poscar = Poscar::from_str_input(text).unwrap();
        assert_eq!(poscar.scale, Scale::Volume(rat!(8)));
        let s = poscar.to_structure().unwrap();
        let vol = s.unitcell().unwrap().cell.volume().to_f64();
        assert!((vol - 8.0).abs() < 1e-6, "volume came out {vol}");
    }

    #[test]
    fn test_cartesian_and_selective_dynamics() {
        let text = "\
cart
1.0
2.0 0.0 0.0
0.0 2.0 0.0
0.0 0.0 2.0
Cu
2
Selective dynamics
Cartesian
0.0 0.0 0.0
1.0 1.0 1.0
";
        let poscar = Poscar::from_str_input(text).unwrap();
        assert!(poscar.selective_dynamics);
        let s = poscar.to_structure().unwrap();
        let groups = s.unitcell().unwrap().sites.groups();
        assert_eq!(groups[0][1], [rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)]);
    }

    #[test]
    fn test_counts_without_symbols() {
        let text = "\
bare counts
1.0
1.0 0.0 0.0
0.0 1.0 0.0
0.0 0.0 1.0
2
Direct
0.0 0.0 0.0
0.5 0.5 0.5
";
        let poscar = Poscar::from_str_input(text).unwrap();
        assert_eq!(poscar.species, None);
        assert_eq!(poscar.counts, vec![2]);
    }

    #[test]
    fn test_parse_error_position() {
        let text = "short\n1.0\n1 0 0\n";
        let err = Poscar::from_str_input(text).unwrap_err();
        assert!(matches!(err, PoscarError::Parse { .. }));
    }

    #[test]
    fn test_bad_marker() {
        let text = "\
m
1.0
1.0 0.0 0.0
0.0 1.0 0.0
0.0 0.0 1.0
1
Q
0.0 0.0 0.0
";
        let err = Poscar::from_str_input(text).unwrap_err();
        let PoscarError::Parse { line, .. } = err else {
            panic!("expected parse error, got {err:?}");
        };
        assert_eq!(line, 7);
    }

    #[test]
    fn test_fix_negative_determinant() {
        let text = "\
left-handed
1.0
0.0 2.0 0.0
2.0 0.0 0.0
0.0 0.0 2.0
Cu
1
Direct
0.25 0.25 0.25
";
        let s = Poscar::from_str_input(text).unwrap().to_structure().unwrap();
        assert_eq!(s.unitcell().unwrap().cell.orientation(), -1);
        let fixed = Poscar::from_structure(&s, true).unwrap();
        let cell = Cell::from_basis(fixed.basis.clone()).unwrap();
        assert_eq!(cell.orientation(), 1);
        let CoordsKind::Direct(coords) = &fixed.coords else {
            panic!("expected direct coordinates");
        };
        assert_eq!(coords.get2(0, 0), rat!(3 / 4));
    }

    #[test]
    fn test_recommend_kpoints() {
        let cell = Cell::from_basis(
            FracTensor::matrix3(&[
                [rat!(2), rat!(0), rat!(0)],
                [rat!(0), rat!(4), rat!(0)],
                [rat!(0), rat!(0), rat!(8)],
            ])
            .unwrap(),
        )
        .unwrap();
        // |b*| = 1/2, 1/4, 1/8; at density 20: ceil(10.5)=11, ceil(5.5)=6, ceil(3)=3.
        assert_eq!(recommend_kpoints(&cell, 20.0).unwrap(), [11, 6, 3]);
    }

    #[test]
    fn test_kpoints_file() {
        let mut out = Vec::new();
        write_kpoints_file(&mut out, [4, 4, 2], "auto grid", false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "auto grid\n0\nMonkhorst-Pack\n4 4 2\n");
    }
}
