//! Site lists in their two flavors: the full unit cell and the symmetry-reduced
//! representative form. Coordinates are exact rationals stored as one shared-denominator
//! tensor; groups correspond to chemically distinct species slots.

use thiserror::Error;

use crate::fract::Rational;
use crate::tensor::{FracTensor, TensorError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SitesError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("site counts do not match the coordinate rows")]
    CountMismatch,
}

/// All occupied positions of the unit cell, grouped by species slot. Group `i` is the
/// `counts[i]` consecutive rows of `coords`; every coordinate lies in `[0,1)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitcellSites {
    coords: FracTensor,
    counts: Vec<usize>,
}

impl UnitcellSites {
    pub fn new(coords: FracTensor, counts: Vec<usize>) -> Result<Self, SitesError> {
        let rows = coords.coord_rows().len();
        if counts.iter().sum::<usize>() != rows {
            return Err(SitesError::CountMismatch);
        }
        Ok(Self { coords: coords.normalize().simplify(), counts })
    }

    pub fn from_groups(groups: &[Vec<[Rational; 3]>]) -> Result<Self, SitesError> {
        let counts: Vec<usize> = groups.iter().map(Vec::len).collect();
        let flat: Vec<[Rational; 3]> = groups.iter().flatten().cloned().collect();
        Ok(Self::new(FracTensor::from_coord_rows(&flat)?, counts)?)
    }

    pub fn coords(&self) -> &FracTensor {
        &self.coords
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn total_sites(&self) -> usize {
        self.counts.iter().sum()
    }

    /// The coordinate groups as rational triples.
    pub fn groups(&self) -> Vec<Vec<[Rational; 3]>> {
        let rows = self.coords.coord_rows();
        let mut out = Vec::with_capacity(self.counts.len());
        let mut start = 0;
        for &n in &self.counts {
            out.push(rows[start..start + n].to_vec());
            start += n;
        }
        out
    }

    /// Group-wise lexicographic sort. Two site lists describing the same crystal compare
    /// equal after sorting, whatever order the atoms arrived in.
    pub fn sorted(&self) -> Result<Self, SitesError> {
        let mut groups = self.groups();
        for g in &mut groups {
            g.sort();
        }
        Self::from_groups(&groups)
    }
}

/// The symmetry-representative sites: one coordinate per orbit, with the Wyckoff letter
/// and the orbit multiplicity from the spacegroup table. Applying the Hall symbol's
/// operations to each representative reproduces exactly the corresponding unit-cell
/// group, with the orbit size equal to the stored multiplicity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepresentativeSites {
    coords: FracTensor,
    counts: Vec<usize>,
    wyckoff: Vec<char>,
    multiplicities: Vec<u32>,
}

impl RepresentativeSites {
    pub fn new(
        coords: FracTensor,
        counts: Vec<usize>,
        wyckoff: Vec<char>,
        multiplicities: Vec<u32>,
    ) -> Result<Self, SitesError> {
        let rows = coords.coord_rows().len();
        if counts.iter().sum::<usize>() != rows
            || wyckoff.len() != rows
            || multiplicities.len() != rows
        {
            return Err(SitesError::CountMismatch);
        }
        Ok(Self { coords: coords.normalize().simplify(), counts, wyckoff, multiplicities })
    }

    pub fn coords(&self) -> &FracTensor {
        &self.coords
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn wyckoff_symbols(&self) -> &[char] {
        &self.wyckoff
    }

    pub fn multiplicities(&self) -> &[u32] {
        &self.multiplicities
    }

    pub fn total_representatives(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Representatives of group `i` with their Wyckoff letters and multiplicities.
    pub fn group(&self, i: usize) -> Vec<([Rational; 3], char, u32)> {
        let rows = self.coords.coord_rows();
        let start: usize = self.counts[..i].iter().sum();
        (start..start + self.counts[i])
            .map(|r| (rows[r].clone(), self.wyckoff[r], self.multiplicities[r]))
            .collect()
    }

    pub fn group_count(&self) -> usize {
        self.counts.len()
    }

    /// Total atoms in the expanded unit cell.
    pub fn total_multiplicity(&self) -> u64 {
        self.multiplicities.iter().map(|&m| m as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_unitcell_sites_normalize() {
        let sites = UnitcellSites::from_groups(&[vec![
            [rat!(3 / 2), rat!(-1 / 4), rat!(0)],
            [rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)],
        ]])
        .unwrap();
        let groups = sites.groups();
        assert_eq!(groups[0][0], [rat!(1 / 2), rat!(3 / 4), rat!(0)]);
        assert_eq!(sites.total_sites(), 2);
    }

    #[test]
    fn test_count_mismatch() {
        let coords =
            FracTensor::from_coord_rows(&[[rat!(0), rat!(0), rat!(0)]]).unwrap();
        assert_eq!(
            UnitcellSites::new(coords, vec![2]),
            Err(SitesError::CountMismatch)
        );
    }

    #[test]
    fn test_sorted_is_order_independent() {
        let a = UnitcellSites::from_groups(&[vec![
            [rat!(1 / 3), rat!(2 / 3), rat!(0)],
            [rat!(0), rat!(0), rat!(0)],
        ]])
        .unwrap();
        let b = UnitcellSites::from_groups(&[vec![
            [rat!(0), rat!(0), rat!(0)],
            [rat!(1 / 3), rat!(2 / 3), rat!(0)],
        ]])
        .unwrap();
        assert_eq!(a.sorted().unwrap(), b.sorted().unwrap());
    }

    #[test]
    fn test_representative_sites() {
        let coords = FracTensor::from_coord_rows(&[
            [rat!(0), rat!(0), rat!(0)],
            [rat!(1 / 2), rat!(1 / 2), rat!(1 / 2)],
        ])
        .unwrap();
        let sites =
            RepresentativeSites::new(coords, vec![1, 1], vec!['a', 'b'], vec![4, 4]).unwrap();
        assert_eq!(sites.total_representatives(), 2);
        assert_eq!(sites.total_multiplicity(), 8);
        let g1 = sites.group(1);
        assert_eq!(g1[0].1, 'b');
    }
}
