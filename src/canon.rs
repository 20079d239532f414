//! Canonicalization between the two site representations: finding the Hall symbol and
//! reduced representative coordinates of a unit cell, and expanding a representative form
//! back to the full cell.
//!
//! The reduction is not a general symmetry finder. It checks which of the table's
//! operations hold exactly for the given coordinate groups; when the surviving set hashes
//! to a known Hall symbol the cell reduces to Wyckoff representatives, otherwise it
//! degrades to `P 1` with a note, never an error.

use std::collections::HashSet;

use log::{debug, warn};
use thiserror::Error;

use crate::fract::Rational;
use crate::sites::{RepresentativeSites, SitesError, UnitcellSites};
use crate::spacegroups::{symops_set_hash, table, SpacegroupEntry, SpacegroupError};
use crate::symop::SymOp;
use crate::tensor::{FracTensor, TensorError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SymmetryError {
    #[error(transparent)]
    Spacegroup(#[from] SpacegroupError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Sites(#[from] SitesError),
    #[error("orbit of a {letter} site in {hall} has {got} members, expected {expected}")]
    InconsistentSymmetry { hall: String, letter: char, expected: u32, got: u32 },
}

/// The result of a symmetry reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub sites: RepresentativeSites,
    pub hall: String,
    /// Present when the reduction had to fall back to `P 1`.
    pub note: Option<String>,
}

fn normalized(coord: &[Rational; 3]) -> [Rational; 3] {
    [
        coord[0].normalize().simplify(),
        coord[1].normalize().simplify(),
        coord[2].normalize().simplify(),
    ]
}

fn image(op: &SymOp, coord: &[Rational; 3]) -> Result<[Rational; 3], TensorError> {
    Ok(normalized(&op.apply(coord)?))
}

/// Whether an operation maps every coordinate group into itself (as sets modulo 1).
fn check_symop(
    op: &SymOp,
    groups: &[Vec<[Rational; 3]>],
    group_sets: &[HashSet<[Rational; 3]>],
) -> Result<bool, TensorError> {
    for (group, set) in groups.iter().zip(group_sets) {
        for coord in group {
            if !set.contains(&image(op, coord)?) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Reduces a unit cell to representative coordinates with Wyckoff labels.
pub fn reduce(uc: &UnitcellSites) -> Result<Reduction, SymmetryError> {
    let groups = uc.groups();
    let group_sets: Vec<HashSet<[Rational; 3]>> = groups
        .iter()
        .map(|g| g.iter().map(normalized).collect())
        .collect();

    let mut surviving: Vec<SymOp> = Vec::new();
    for op in table().distinct_ops() {
        if check_symop(op, &groups, &group_sets)? {
            surviving.push(op.clone());
        }
    }
    debug!("symmetry search kept {} of {} operations", surviving.len(), table().distinct_ops().len());

    let hash = symops_set_hash(&surviving);
    match table().by_symops_hash(hash) {
        Some(entry) => {
            let sites = reduce_with(&groups, &surviving, entry)?;
            Ok(Reduction { sites, hall: entry.hall.clone(), note: None })
        }
        None => {
            warn!("operation-set hash {hash:#x} not in the table; falling back to P 1");
            // Sort within groups so the fallback form is independent of input order.
            let sorted = uc.sorted()?;
            let total = sorted.total_sites();
            let sites = RepresentativeSites::new(
                sorted.coords().clone(),
                sorted.counts().to_vec(),
                vec!['a'; total],
                vec![1; total],
            )?;
            Ok(Reduction {
                sites,
                hall: "P 1".to_owned(),
                note: Some("surviving operation set not in the table".to_owned()),
            })
        }
    }
}

fn reduce_with(
    groups: &[Vec<[Rational; 3]>],
    surviving: &[SymOp],
    entry: &SpacegroupEntry,
) -> Result<RepresentativeSites, SymmetryError> {
    let mut counts = Vec::with_capacity(groups.len());
    let mut coords: Vec<[Rational; 3]> = Vec::new();
    let mut letters = Vec::new();
    let mut mults = Vec::new();

    for group in groups {
        // Partition into orbits: an atom starts a new orbit iff it is not an image of an
        // already-kept atom under any surviving operation.
        let mut seen: HashSet<[Rational; 3]> = HashSet::new();
        let mut orbits: Vec<Vec<[Rational; 3]>> = Vec::new();
        for coord in group {
            let c = normalized(coord);
            if seen.contains(&c) {
                continue;
            }
            let mut orbit: Vec<[Rational; 3]> = Vec::new();
            for op in surviving {
                let img = image(op, &c)?;
                if seen.insert(img.clone()) {
                    orbit.push(img);
                }
            }
            orbits.push(orbit);
        }

        // One representative per orbit: the first Wyckoff position (most specific first)
        // whose multiplicity matches the orbit size and whose pattern some orbit member
        // fits; the smallest matching member makes the choice independent of input order.
        let mut reps: Vec<([Rational; 3], char, u32)> = Vec::new();
        for orbit in &orbits {
            let mut sorted_orbit = orbit.clone();
            sorted_orbit.sort();
            let mut chosen = None;
            for w in &entry.wyckoffs {
                if w.multiplicity as usize != orbit.len() {
                    continue;
                }
                if let Some(member) = sorted_orbit.iter().find(|m| w.matches(m)) {
                    chosen = Some((member.clone(), w.letter, w.multiplicity));
                    break;
                }
            }
            let rep = match chosen {
                Some(r) => r,
                None => {
                    let general = entry.general_position();
                    warn!(
                        "no {} wyckoff position fits an orbit of {} sites; using {}",
                        entry.hall,
                        orbit.len(),
                        general.letter
                    );
                    (sorted_orbit[0].clone(), general.letter, orbit.len() as u32)
                }
            };
            reps.push(rep);
        }
        reps.sort();

        counts.push(reps.len());
        for (coord, letter, mult) in reps {
            coords.push(coord);
            letters.push(letter);
            mults.push(mult);
        }
    }

    Ok(RepresentativeSites::new(
        FracTensor::from_coord_rows(&coords)?,
        counts,
        letters,
        mults,
    )?)
}

/// Expands representative coordinates to the full unit cell under a Hall symbol's
/// operations. The orbit of each representative must have exactly the multiplicity the
/// table declares for its Wyckoff letter.
pub fn expand(rc: &RepresentativeSites, hall: &str) -> Result<UnitcellSites, SymmetryError> {
    let entry = table().lookup(hall)?;
    let mut groups: Vec<Vec<[Rational; 3]>> = Vec::with_capacity(rc.group_count());
    for gi in 0..rc.group_count() {
        let mut cell_coords: Vec<[Rational; 3]> = Vec::new();
        for (coord, letter, _stored_mult) in rc.group(gi) {
            let mut orbit: Vec<[Rational; 3]> = Vec::new();
            for op in &entry.symops {
                let img = image(op, &coord)?;
                if !orbit.contains(&img) {
                    orbit.push(img);
                }
            }
            let expected = entry
                .wyckoff(letter)
                .map(|w| w.multiplicity)
                .unwrap_or(orbit.len() as u32);
            if orbit.len() as u32 != expected {
                return Err(SymmetryError::InconsistentSymmetry {
                    hall: entry.hall.clone(),
                    letter,
                    expected,
                    got: orbit.len() as u32,
                });
            }
            cell_coords.extend(orbit);
        }
        cell_coords.sort();
        groups.push(cell_coords);
    }
    Ok(UnitcellSites::from_groups(&groups)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat;
    use crate::tensor::FracTensor;

    use pretty_assertions::assert_eq;

    fn nacl_unitcell() -> UnitcellSites {
        let f0 = rat!(0);
        let f12 = rat!(1 / 2);
        UnitcellSites::from_groups(&[
            vec![
                [f0, f0, f0],
                [f0, f12, f12],
                [f12, f0, f12],
                [f12, f12, f0],
            ],
            vec![
                [f12, f12, f12],
                [f12, f0, f0],
                [f0, f12, f0],
                [f0, f0, f12],
            ],
        ])
        .unwrap()
    }

    fn nacl_representative() -> RepresentativeSites {
        RepresentativeSites::new(
            FracTensor::from_coord_rows(&[
                [rat!(0), rat!(0), rat!(0)],
                [rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)],
            ])
            .unwrap(),
            vec![1, 1],
            vec!['a', 'b'],
            vec![4, 4],
        )
        .unwrap()
    }

    #[test]
    fn test_expand_nacl() {
        let uc = expand(&nacl_representative(), "-F 4 2 3").unwrap();
        assert_eq!(uc.counts(), &[4, 4]);
        assert_eq!(uc.sorted().unwrap(), nacl_unitcell().sorted().unwrap());
    }

    #[test]
    fn test_reduce_nacl() {
        let reduction = reduce(&nacl_unitcell()).unwrap();
        assert_eq!(reduction.hall, "-F 4 2 3");
        assert_eq!(reduction.note, None);
        assert_eq!(reduction.sites.wyckoff_symbols(), &['a', 'b']);
        assert_eq!(reduction.sites.multiplicities(), &[4, 4]);
        assert_eq!(reduction.sites.counts(), &[1, 1]);
    }

    #[test]
    fn test_roundtrip() {
        let uc = nacl_unitcell();
        let reduction = reduce(&uc).unwrap();
        let back = expand(&reduction.sites, &reduction.hall).unwrap();
        assert_eq!(back.sorted().unwrap(), uc.sorted().unwrap());
    }

    #[test]
    fn test_hexagonal_order_independence() {
        let a = [rat!(0), rat!(0), rat!(0)];
        let b = [rat!(1 / 3), rat!(2 / 3), rat!(0)];
        let c = [rat!(2 / 3), rat!(1 / 3), rat!(0)];
        let mut results = Vec::new();
        for perm in [
            vec![a.clone(), b.clone(), c.clone()],
            vec![b.clone(), c.clone(), a.clone()],
            vec![c.clone(), a.clone(), b.clone()],
        ] {
            let uc = UnitcellSites::from_groups(&[perm]).unwrap();
            let reduction = reduce(&uc).unwrap();
            results.push(reduction);
        }
        for r in &results[1..] {
            assert_eq!(r.hall, results[0].hall);
            assert_eq!(r.sites, results[0].sites);
        }
        assert_eq!(results[0].hall, "-P 6 2");
        assert_eq!(results[0].sites.wyckoff_symbols(), &['a', 'c']);
        assert_eq!(results[0].sites.multiplicities(), &[1, 2]);
    }

    #[test]
    fn test_bcc_reduction() {
        let uc = UnitcellSites::from_groups(&[vec![
            [rat!(0), rat!(0), rat!(0)],
            [rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)],
        ]])
        .unwrap();
        let reduction = reduce(&uc).unwrap();
        assert_eq!(reduction.hall, "-I 4 2 3");
        assert_eq!(reduction.sites.wyckoff_symbols(), &['a']);
        assert_eq!(reduction.sites.multiplicities(), &[2]);
    }

    #[test]
    fn test_general_position_is_p1() {
        // A single fully general atom is stabilized by the identity alone, which IS the
        // P 1 operation set: a clean hit, not a fallback. (1/7,3/7,5/7 avoids the
        // hexagonal mirrors, which fix any point with y = 2x.)
        let uc = UnitcellSites::from_groups(&[vec![
            [rat!(1 / 7), rat!(3 / 7), rat!(5 / 7)],
        ]])
        .unwrap();
        let reduction = reduce(&uc).unwrap();
        assert_eq!(reduction.hall, "P 1");
        assert_eq!(reduction.note, None);
        assert_eq!(reduction.sites.multiplicities(), &[1]);
    }

    #[test]
    fn test_p1_fallback() {
        // (1/7,0,0) is stabilized by the eight operations fixing the x axis pointwise,
        // an mmm-type set with no Hall symbol in the table.
        let uc = UnitcellSites::from_groups(&[vec![
            [rat!(1 / 7), rat!(0), rat!(0)],
        ]])
        .unwrap();
        let reduction = reduce(&uc).unwrap();
        assert_eq!(reduction.hall, "P 1");
        assert!(reduction.note.is_some());
        assert_eq!(reduction.sites.wyckoff_symbols(), &['a']);
        assert_eq!(reduction.sites.multiplicities(), &[1]);
    }

    #[test]
    fn test_inconsistent_multiplicity() {
        // (1/4,0,0) sits on the 24-fold e orbit of Fm-3m, not the 4-fold a orbit.
        let rc = RepresentativeSites::new(
            FracTensor::from_coord_rows(&[[rat!(1 / 4), rat!(0), rat!(0)]]).unwrap(),
            vec![1],
            vec!['a'],
            vec![4],
        )
        .unwrap();
        let err = expand(&rc, "-F 4 2 3").unwrap_err();
        assert!(matches!(
            err,
            SymmetryError::InconsistentSymmetry { expected: 4, got: 24, .. }
        ));
    }

    #[test]
    fn test_expand_unknown_hall() {
        let rc = nacl_representative();
        assert!(matches!(
            expand(&rc, "-Z 9 9"),
            Err(SymmetryError::Spacegroup(SpacegroupError::UnknownHallSymbol(_)))
        ));
    }
}
