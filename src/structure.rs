//! The aggregate structure entity: cell, sites and assignments in unit-cell form,
//! representative form, or both, plus free-form tags and citation records.

use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;

use crate::assignments::{AssignmentError, Assignments};
use crate::canon;
use crate::cell::{Cell, CellError};
use crate::hash::{Hashable, TupleValue};
use crate::sites::{RepresentativeSites, SitesError, UnitcellSites};
use crate::spacegroups::{table, SpacegroupError};
use crate::canon::SymmetryError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error(transparent)]
    Symmetry(#[from] SymmetryError),
    #[error(transparent)]
    Sites(#[from] SitesError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error(transparent)]
    Cell(#[from] CellError),
    #[error(transparent)]
    Spacegroup(#[from] SpacegroupError),
    #[error("assignment groups do not match the coordinate groups")]
    GroupMismatch,
}

/// A value-typed citation record attached to a structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Citation {
    pub ref_string: String,
}

impl Citation {
    pub fn new(ref_string: impl Into<String>) -> Self {
        Self { ref_string: ref_string.into() }
    }
}

/// The unit-cell side of a structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitcellData {
    pub cell: Cell,
    pub sites: UnitcellSites,
}

/// The symmetry-reduced side of a structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepresentativeData {
    pub cell: Cell,
    pub sites: RepresentativeSites,
    pub hall: String,
}

/// Which representations a structure currently carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureRepr {
    UnitcellOnly(UnitcellData),
    RepresentativeOnly(RepresentativeData),
    Both(UnitcellData, RepresentativeData),
}

/// An immutable crystal structure. Produced by the codecs or by the `from_*`
/// constructors and only queried afterwards; conversions between representations go
/// through [`Structure::canonicalized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    repr: StructureRepr,
    assignments: Assignments,
    tags: BTreeMap<String, String>,
    references: Vec<Citation>,
}

impl Structure {
    pub fn from_unitcell(
        cell: Cell,
        sites: UnitcellSites,
        assignments: Assignments,
    ) -> Result<Self, StructureError> {
        if assignments.group_count() != sites.counts().len() {
            return Err(StructureError::GroupMismatch);
        }
        Ok(Self {
            repr: StructureRepr::UnitcellOnly(UnitcellData { cell, sites }),
            assignments,
            tags: BTreeMap::new(),
            references: Vec::new(),
        })
    }

    /// `spacegroup` accepts any designation the table resolves: a Hall symbol, an ITC
    /// number (with optional `:setting`), a Hermann-Mauguin or Schoenflies symbol.
    pub fn from_representative(
        cell: Cell,
        sites: RepresentativeSites,
        spacegroup: &str,
        assignments: Assignments,
    ) -> Result<Self, StructureError> {
        let entry = table().resolve(spacegroup)?;
        if assignments.group_count() != sites.counts().len() {
            return Err(StructureError::GroupMismatch);
        }
        Ok(Self {
            repr: StructureRepr::RepresentativeOnly(RepresentativeData {
                cell,
                sites,
                hall: entry.hall.clone(),
            }),
            assignments,
            tags: BTreeMap::new(),
            references: Vec::new(),
        })
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_reference(mut self, citation: Citation) -> Self {
        self.references.push(citation);
        self
    }

    pub fn repr(&self) -> &StructureRepr {
        &self.repr
    }

    pub fn assignments(&self) -> &Assignments {
        &self.assignments
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn references(&self) -> &[Citation] {
        &self.references
    }

    pub fn unitcell(&self) -> Option<&UnitcellData> {
        match &self.repr {
            StructureRepr::UnitcellOnly(uc) | StructureRepr::Both(uc, _) => Some(uc),
            StructureRepr::RepresentativeOnly(_) => None,
        }
    }

    pub fn representative(&self) -> Option<&RepresentativeData> {
        match &self.repr {
            StructureRepr::RepresentativeOnly(rc) | StructureRepr::Both(_, rc) => Some(rc),
            StructureRepr::UnitcellOnly(_) => None,
        }
    }

    /// Converts to the `Both` representation, running the canonicalizer for whichever
    /// side is missing.
    pub fn canonicalized(self) -> Result<Self, StructureError> {
        let Self { repr, assignments, tags, references } = self;
        let repr = match repr {
            both @ StructureRepr::Both(..) => both,
            StructureRepr::UnitcellOnly(uc) => {
                let reduction = canon::reduce(&uc.sites)?;
                debug!("reduced unit cell to {} with {} representatives",
                    reduction.hall, reduction.sites.total_representatives());
                let rc = RepresentativeData {
                    cell: uc.cell.clone(),
                    sites: reduction.sites,
                    hall: reduction.hall,
                };
                StructureRepr::Both(uc, rc)
            }
            StructureRepr::RepresentativeOnly(rc) => {
                let sites = canon::expand(&rc.sites, &rc.hall)?;
                debug!("expanded {} representatives to {} sites under {}",
                    rc.sites.total_representatives(), sites.total_sites(), rc.hall);
                let uc = UnitcellData { cell: rc.cell.clone(), sites };
                StructureRepr::Both(uc, rc)
            }
        };
        Ok(Self { repr, assignments, tags, references })
    }

    /// Per-group atom counts in the full unit cell, whichever side carries them.
    pub fn group_atom_counts(&self) -> Vec<usize> {
        match &self.repr {
            StructureRepr::UnitcellOnly(uc) | StructureRepr::Both(uc, _) => {
                uc.sites.counts().to_vec()
            }
            StructureRepr::RepresentativeOnly(rc) => (0..rc.sites.group_count())
                .map(|i| rc.sites.group(i).iter().map(|(_, _, m)| *m as usize).sum())
                .collect(),
        }
    }

    pub fn formula(&self) -> String {
        self.assignments.formula(&self.group_atom_counts())
    }

    /// The content hash. Always computed over the representative form (reducing
    /// transiently when the structure only carries a unit cell), so equivalent
    /// descriptions hash identically whichever way they were built.
    pub fn hexhash(&self) -> Result<String, StructureError> {
        let (cell, sites, hall) = match &self.repr {
            StructureRepr::RepresentativeOnly(rc) | StructureRepr::Both(_, rc) => {
                (rc.cell.clone(), rc.sites.clone(), rc.hall.clone())
            }
            StructureRepr::UnitcellOnly(uc) => {
                let reduction = canon::reduce(&uc.sites)?;
                (uc.cell.clone(), reduction.sites, reduction.hall)
            }
        };
        let tuple = TupleValue::Seq(vec![
            TupleValue::str("Structure"),
            TupleValue::field("hall_symbol", TupleValue::str(hall)),
            TupleValue::field("rc_cell", TupleValue::str(cell.hexhash())),
            TupleValue::field("rc_sites", TupleValue::str(sites.hexhash())),
            TupleValue::field("assignments", TupleValue::str(self.assignments.hexhash())),
        ]);
        Ok(crate::hash::hexhash_tuple(&tuple))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat;
    use crate::tensor::FracTensor;

    use pretty_assertions::assert_eq;

    fn cubic_cell(a: i128) -> Cell {
        Cell::from_basis(
            FracTensor::matrix3(&[
                [rat!(a), rat!(0), rat!(0)],
                [rat!(0), rat!(a), rat!(0)],
                [rat!(0), rat!(0), rat!(a)],
            ])
            .unwrap(),
        )
        .unwrap()
    }

    fn nacl_from_unitcell() -> Structure {
        let f0 = rat!(0);
        let f12 = rat!(1 / 2);
        let sites = UnitcellSites::from_groups(&[
            vec![[f0, f0, f0], [f0, f12, f12], [f12, f0, f12], [f12, f12, f0]],
            vec![[f12, f12, f12], [f12, f0, f0], [f0, f12, f0], [f0, f0, f12]],
        ])
        .unwrap();
        Structure::from_unitcell(
            cubic_cell(5),
            sites,
            Assignments::from_symbols(&["Na", "Cl"]).unwrap(),
        )
        .unwrap()
    }

    fn nacl_from_representative() -> Structure {
        let sites = RepresentativeSites::new(
            FracTensor::from_coord_rows(&[
                [rat!(0), rat!(0), rat!(0)],
                [rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)],
            ])
            .unwrap(),
            vec![1, 1],
            vec!['a', 'b'],
            vec![4, 4],
        )
        .unwrap();
        Structure::from_representative(
            cubic_cell(5),
            sites,
            "-F 4 2 3",
            Assignments::from_symbols(&["Na", "Cl"]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_canonicalize_from_unitcell() {
        let s = nacl_from_unitcell().canonicalized().unwrap();
        let rc = s.representative().unwrap();
        assert_eq!(rc.hall, "-F 4 2 3");
        assert_eq!(rc.sites.wyckoff_symbols(), &['a', 'b']);
        assert_eq!(s.formula(), "ClNa");
    }

    #[test]
    fn test_canonicalize_from_representative() {
        let s = nacl_from_representative().canonicalized().unwrap();
        let uc = s.unitcell().unwrap();
        assert_eq!(uc.sites.counts(), &[4, 4]);
        assert_eq!(s.group_atom_counts(), vec![4, 4]);
    }

    #[test]
    fn test_hash_invariant_under_construction_path() {
        let from_uc = nacl_from_unitcell();
        let from_rc = nacl_from_representative();
        assert_eq!(from_uc.hexhash().unwrap(), from_rc.hexhash().unwrap());
    }

    #[test]
    fn test_hash_invariant_under_coordinate_order() {
        let f0 = rat!(0);
        let f12 = rat!(1 / 2);
        let shuffled = UnitcellSites::from_groups(&[
            vec![[f12, f0, f12], [f0, f0, f0], [f12, f12, f0], [f0, f12, f12]],
            vec![[f0, f0, f12], [f12, f12, f12], [f0, f12, f0], [f12, f0, f0]],
        ])
        .unwrap();
        let s = Structure::from_unitcell(
            cubic_cell(5),
            shuffled,
            Assignments::from_symbols(&["Na", "Cl"]).unwrap(),
        )
        .unwrap();
        assert_eq!(s.hexhash().unwrap(), nacl_from_unitcell().hexhash().unwrap());
    }

    #[test]
    fn test_hash_ignores_tags() {
        let tagged = nacl_from_unitcell().with_tag("comment", "rock salt");
        assert_eq!(tagged.hexhash().unwrap(), nacl_from_unitcell().hexhash().unwrap());
        assert_eq!(tagged.tags().get("comment").map(String::as_str), Some("rock salt"));
    }

    #[test]
    fn test_alternative_spacegroup_designations() {
        for designation in ["Fm-3m", "225", "Oh^5"] {
            let sites = RepresentativeSites::new(
                FracTensor::from_coord_rows(&[
                    [rat!(0), rat!(0), rat!(0)],
                    [rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)],
                ])
                .unwrap(),
                vec![1, 1],
                vec!['a', 'b'],
                vec![4, 4],
            )
            .unwrap();
            let s = Structure::from_representative(
                cubic_cell(5),
                sites,
                designation,
                Assignments::from_symbols(&["Na", "Cl"]).unwrap(),
            )
            .unwrap();
            assert_eq!(s.representative().unwrap().hall, "-F 4 2 3");
        }
    }

    #[test]
    fn test_group_mismatch() {
        let sites = UnitcellSites::from_groups(&[vec![[rat!(0), rat!(0), rat!(0)]]]).unwrap();
        let err = Structure::from_unitcell(
            cubic_cell(2),
            sites,
            Assignments::from_symbols(&["Na", "Cl"]).unwrap(),
        );
        assert_eq!(err, Err(StructureError::GroupMismatch));
    }

    #[test]
    fn test_references() {
        let s = nacl_from_unitcell()
            .with_reference(Citation::new("Madelung, Z. Phys. 19 (1918)"));
        assert_eq!(s.references().len(), 1);
    }
}
