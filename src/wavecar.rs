//! The WAVECAR binary codec: a record-structured container of plane-wave coefficients,
//! with the gamma-point half-sphere compression and the overlap operation used to
//! validate conversions.
//!
//! Layout: a per-file record length `R`; record 0 holds `(R, nspin, precision tag)`,
//! record 1 holds `(nkpt, nband, Ecut, basis)`; then for every (spin, k-point) one header
//! record with the k-vector and per-band `(eigenvalue, 0, occupation)` triples, followed
//! by one coefficient record per band. Coefficients are complex singles (tag 45200) or
//! doubles (tag 45210), little endian.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use nalgebra::{Matrix3, Vector3};
use num_complex::Complex64;
use thiserror::Error;

use crate::fileio::{AtomicFile, CancelToken};

/// 1 a.u. in Ångström.
pub const AU_TO_ANGSTROM: f64 = 0.529177249;
/// 1 Ry in eV.
pub const RY_TO_EV: f64 = 13.605826;
/// ħ²/2mₑ in eV·Å².
const KINE_PREFACTOR: f64 = RY_TO_EV * AU_TO_ANGSTROM * AU_TO_ANGSTROM;

const RTAG_SINGLE: i64 = 45200;
const RTAG_DOUBLE: i64 = 45210;

#[derive(Debug, Error)]
pub enum WavecarError {
    #[error("{path}: {source}")]
    File {
        path: String,
        #[source]
        source: Box<WavecarError>,
    },
    #[error("record-length inconsistency: {0}")]
    BadMagic(String),
    #[error("unsupported precision tag {0}; pass the precision explicitly")]
    UnsupportedPrecision(i64),
    #[error("invalid conversion: {0}")]
    InvalidConversion(String),
    #[error("truncated record: expected {expected} bytes, got {got}")]
    TruncatedRecord { expected: u64, got: u64 },
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coefficient storage precision, from the header tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    fn from_rtag(rtag: i64) -> Option<Self> {
        match rtag {
            RTAG_SINGLE => Some(Self::Single),
            RTAG_DOUBLE => Some(Self::Double),
            _ => None,
        }
    }

    fn rtag(self) -> i64 {
        match self {
            Self::Single => RTAG_SINGLE,
            Self::Double => RTAG_DOUBLE,
        }
    }

    /// Bytes per stored complex coefficient.
    fn data_size(self) -> usize {
        match self {
            Self::Single => 8,
            Self::Double => 16,
        }
    }
}

/// The axis along which the gamma half-sphere keeps its lexicographically positive
/// representative. A construction parameter; decoders must be told which one was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GammaAxis {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavFormat {
    /// Full cutoff sphere at every k-point.
    Std,
    /// Gamma-point-only half sphere.
    Gam,
}

/// One band's bookkeeping from the (spin, k) header record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandInfo {
    pub eigenvalue: f64,
    pub occupation: f64,
}

/// Subset selection for [`PlaneWaves::write`]; indices are 1-based as everywhere in this
/// format's conventions. `None` selects everything.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub spins: Option<Vec<usize>>,
    pub kpts: Option<Vec<usize>>,
    pub bands: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Complete,
    Cancelled,
}

#[derive(Debug)]
enum Backing {
    OnDisk { file: File, offsets: Vec<u64>, disk_precision: Precision },
    Memory { coeffs: Vec<Vec<Complex64>> },
}

/// A set of plane-wave wavefunctions: eager headers, lazy coefficients.
///
/// The coefficient index lives behind `&mut self`; two handles on the same file are
/// independent (each owns its descriptor), while one handle serializes its reads.
#[derive(Debug)]
pub struct PlaneWaves {
    nspin: usize,
    nkpt: usize,
    nband: usize,
    encut: f64,
    basis: Matrix3<f64>,
    kpts: Vec<[f64; 3]>,
    nplw: Vec<usize>,
    bands: Vec<BandInfo>,
    precision: Precision,
    format: WavFormat,
    gamma_axis: GammaAxis,
    gvecs: Vec<Vec<[i64; 3]>>,
    backing: Backing,
}

impl PlaneWaves {
    pub fn nspin(&self) -> usize {
        self.nspin
    }

    pub fn nkpt(&self) -> usize {
        self.nkpt
    }

    pub fn nband(&self) -> usize {
        self.nband
    }

    pub fn encut(&self) -> f64 {
        self.encut
    }

    pub fn format(&self) -> WavFormat {
        self.format
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn kpt(&self, kpt: usize) -> [f64; 3] {
        self.kpts[kpt - 1]
    }

    pub fn nplw(&self, kpt: usize) -> usize {
        self.nplw[kpt - 1]
    }

    pub fn band_info(&self, spin: usize, kpt: usize, band: usize) -> BandInfo {
        self.bands[((spin - 1) * self.nkpt + (kpt - 1)) * self.nband + (band - 1)]
    }

    /// The G-vector list of a k-point, in the canonical grid-scan order.
    pub fn gvecs(&self, kpt: usize) -> &[[i64; 3]] {
        &self.gvecs[kpt - 1]
    }

    /// Opens a WAVECAR file. `precision` overrides an unrecognized header tag;
    /// `gamma_axis` names the half-sphere axis used by the producer (default x).
    pub fn open(
        path: impl AsRef<Path>,
        precision: Option<Precision>,
        gamma_axis: Option<GammaAxis>,
    ) -> Result<Self, WavecarError> {
        let path = path.as_ref();
        let wrap = |e: WavecarError| WavecarError::File {
            path: path.display().to_string(),
            source: Box::new(e),
        };
        Self::open_inner(path, precision, gamma_axis).map_err(wrap)
    }

    fn open_inner(
        path: &Path,
        precision: Option<Precision>,
        gamma_axis: Option<GammaAxis>,
    ) -> Result<Self, WavecarError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let rec0 = read_f64s(&mut file, 3)?;
        let record_len = rec0[0];
        if !record_len.is_finite()
            || record_len < 24.0
            || record_len > 1e12
            || record_len.fract() != 0.0
            || (record_len as u64) % 8 != 0
        {
            return Err(WavecarError::BadMagic(format!("record length {record_len}")));
        }
        let record_len = record_len as u64;
        let nspin = rec0[1] as usize;
        if !(1..=2).contains(&nspin) {
            return Err(WavecarError::BadMagic(format!("spin count {}", rec0[1])));
        }
        let rtag = rec0[2] as i64;
        // An explicit precision wins over the header tag.
        let disk_precision = match precision.or_else(|| Precision::from_rtag(rtag)) {
            Some(p) => p,
            None => return Err(WavecarError::UnsupportedPrecision(rtag)),
        };

        file.seek(SeekFrom::Start(record_len))?;
        let rec1 = read_f64s(&mut file, 12)?;
        let nkpt = rec1[0] as usize;
        let nband = rec1[1] as usize;
        let encut = rec1[2];
        if nkpt == 0 || nband == 0 || encut <= 0.0 {
            return Err(WavecarError::BadMagic(format!(
                "nkpt {} nband {} encut {}",
                rec1[0], rec1[1], rec1[2]
            )));
        }
        let basis = Matrix3::from_fn(|i, j| rec1[3 + 3 * i + j]);

        let expected_len = (2 + nspin as u64 * nkpt as u64 * (nband as u64 + 1)) * record_len;
        if file_len < expected_len {
            return Err(WavecarError::BadMagic(format!(
                "file holds {file_len} bytes, layout needs {expected_len}"
            )));
        }

        let mut kpts = vec![[0.0; 3]; nkpt];
        let mut nplw = vec![0usize; nkpt];
        let mut bands = Vec::with_capacity(nspin * nkpt * nband);
        for s in 0..nspin {
            for k in 0..nkpt {
                let header_rec = 2 + (s * nkpt + k) * (nband + 1);
                file.seek(SeekFrom::Start(header_rec as u64 * record_len))?;
                let rec = read_f64s(&mut file, 4 + 3 * nband)?;
                if s == 0 {
                    nplw[k] = rec[0] as usize;
                    kpts[k] = [rec[1], rec[2], rec[3]];
                }
                for b in 0..nband {
                    bands.push(BandInfo {
                        eigenvalue: rec[4 + 3 * b],
                        occupation: rec[4 + 3 * b + 2],
                    });
                }
            }
        }

        let gamma_axis = gamma_axis.unwrap_or(GammaAxis::X);
        let grid = grid_size(&basis, encut);
        let (format, gvecs) =
            detect_format(&basis, encut, grid, &kpts, &nplw, gamma_axis)?;
        debug!(
            "wavecar: {} spins, {} k-points, {} bands, {:?} format",
            nspin, nkpt, nband, format
        );

        let mut offsets = Vec::with_capacity(nspin * nkpt * nband);
        for s in 0..nspin {
            for k in 0..nkpt {
                for b in 0..nband {
                    let rec =
                        2 + (s * nkpt + k) * (nband + 1) + 1 + b;
                    offsets.push(rec as u64 * record_len);
                }
            }
        }

        Ok(Self {
            nspin,
            nkpt,
            nband,
            encut,
            basis,
            kpts,
            nplw,
            bands,
            precision: disk_precision,
            format,
            gamma_axis,
            gvecs,
            backing: Backing::OnDisk { file, offsets, disk_precision },
        })
    }

    /// Builds an in-memory wavefunction set. Coefficients are indexed `[spin][kpt][band]`
    /// and must match the G-set sizes implied by the cutoff, format and axis.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        encut: f64,
        basis: Matrix3<f64>,
        kpts: Vec<[f64; 3]>,
        bands: Vec<BandInfo>,
        coeffs: Vec<Vec<Vec<Vec<Complex64>>>>,
        format: WavFormat,
        gamma_axis: GammaAxis,
        precision: Precision,
    ) -> Result<Self, WavecarError> {
        let nspin = coeffs.len();
        if nspin == 0 || nspin > 2 {
            return Err(WavecarError::CorruptRecord("need 1 or 2 spin channels".into()));
        }
        let nkpt = kpts.len();
        if coeffs.iter().any(|per_spin| per_spin.len() != nkpt) {
            return Err(WavecarError::CorruptRecord("coefficient k-point count mismatch".into()));
        }
        let nband = coeffs[0].first().map(Vec::len).unwrap_or(0);
        if nband == 0 || coeffs.iter().flatten().any(|per_kpt| per_kpt.len() != nband) {
            return Err(WavecarError::CorruptRecord("coefficient band count mismatch".into()));
        }
        if bands.len() != nspin * nkpt * nband {
            return Err(WavecarError::CorruptRecord("band info length mismatch".into()));
        }
        if format == WavFormat::Gam && (nkpt != 1 || !is_gamma_point(&kpts[0])) {
            return Err(WavecarError::InvalidConversion(
                "gamma format requires a single gamma k-point".into(),
            ));
        }

        let grid = grid_size(&basis, encut);
        let recip = recip_2pi(&basis);
        let mut gvecs = Vec::with_capacity(nkpt);
        let mut nplw = Vec::with_capacity(nkpt);
        for (k, kvec) in kpts.iter().enumerate() {
            let gamma = if format == WavFormat::Gam { Some(gamma_axis) } else { None };
            let gv = gen_gvecs(&gen_kgrid(grid, gamma), kvec, &recip, encut);
            for per_spin in &coeffs {
                if per_spin[k].iter().any(|band| band.len() != gv.len()) {
                    return Err(WavecarError::CorruptRecord(format!(
                        "k-point {} expects {} coefficients",
                        k + 1,
                        gv.len()
                    )));
                }
            }
            nplw.push(gv.len());
            gvecs.push(gv);
        }

        let flat: Vec<Vec<Complex64>> = coeffs.into_iter().flatten().flatten().collect();
        Ok(Self {
            nspin,
            nkpt,
            nband,
            encut,
            basis,
            kpts,
            nplw,
            bands,
            precision,
            format,
            gamma_axis,
            gvecs,
            backing: Backing::Memory { coeffs: flat },
        })
    }

    /// Fetches one band's coefficient vector, reading lazily from the file backing.
    pub fn read_band(
        &mut self,
        spin: usize,
        kpt: usize,
        band: usize,
    ) -> Result<Vec<Complex64>, WavecarError> {
        if !(1..=self.nspin).contains(&spin)
            || !(1..=self.nkpt).contains(&kpt)
            || !(1..=self.nband).contains(&band)
        {
            return Err(WavecarError::CorruptRecord(format!(
                "band index ({spin},{kpt},{band}) out of range"
            )));
        }
        let idx = ((spin - 1) * self.nkpt + (kpt - 1)) * self.nband + (band - 1);
        let count = self.nplw[kpt - 1];
        match &mut self.backing {
            Backing::Memory { coeffs } => Ok(coeffs[idx].clone()),
            Backing::OnDisk { file, offsets, disk_precision, .. } => {
                file.seek(SeekFrom::Start(offsets[idx]))?;
                match disk_precision {
                    Precision::Double => {
                        let raw = read_f64s(file, 2 * count)?;
                        Ok(raw.chunks_exact(2).map(|c| Complex64::new(c[0], c[1])).collect())
                    }
                    Precision::Single => {
                        let raw = read_f32s(file, 2 * count)?;
                        Ok(raw
                            .chunks_exact(2)
                            .map(|c| Complex64::new(c[0] as f64, c[1] as f64))
                            .collect())
                    }
                }
            }
        }
    }

    /// A band expanded to the full cutoff sphere, whatever the storage format.
    fn band_std_coeffs(
        &mut self,
        spin: usize,
        kpt: usize,
        band: usize,
    ) -> Result<(Vec<[i64; 3]>, Vec<Complex64>), WavecarError> {
        let coeffs = self.read_band(spin, kpt, band)?;
        match self.format {
            WavFormat::Std => Ok((self.gvecs[kpt - 1].clone(), coeffs)),
            WavFormat::Gam => {
                let grid = grid_size(&self.basis, self.encut);
                let recip = recip_2pi(&self.basis);
                let std_gvecs =
                    gen_gvecs(&gen_kgrid(grid, None), &self.kpts[kpt - 1], &recip, self.encut);
                let expanded = expand_gamma(&coeffs, &self.gvecs[kpt - 1], &std_gvecs);
                Ok((std_gvecs, expanded))
            }
        }
    }

    /// Writes a (subset of the) wavefunction set to `path`, optionally converting
    /// between the standard and gamma formats. The write is atomic and checks the
    /// cancellation token at record boundaries.
    pub fn write(
        &mut self,
        path: impl AsRef<Path>,
        selection: &Selection,
        format: Option<WavFormat>,
        gamma_axis: Option<GammaAxis>,
        cancel: &CancelToken,
    ) -> Result<WriteOutcome, WavecarError> {
        let path = path.as_ref();
        let wrap = |e: WavecarError| WavecarError::File {
            path: path.display().to_string(),
            source: Box::new(e),
        };
        self.write_inner(path, selection, format, gamma_axis, cancel).map_err(wrap)
    }

    fn write_inner(
        &mut self,
        path: &Path,
        selection: &Selection,
        format: Option<WavFormat>,
        gamma_axis: Option<GammaAxis>,
        cancel: &CancelToken,
    ) -> Result<WriteOutcome, WavecarError> {
        let spins = resolve_selection(&selection.spins, self.nspin, "spin")?;
        let kpts = resolve_selection(&selection.kpts, self.nkpt, "k-point")?;
        let bands = resolve_selection(&selection.bands, self.nband, "band")?;

        let to_format = format.unwrap_or(self.format);
        let out_axis = gamma_axis.unwrap_or(self.gamma_axis);
        if to_format == WavFormat::Gam {
            let only_gamma = kpts.len() == 1 && is_gamma_point(&self.kpts[kpts[0] - 1]);
            if !only_gamma {
                return Err(WavecarError::InvalidConversion(
                    "gamma format can only hold the single gamma k-point".into(),
                ));
            }
        }

        // Output G-sets per selected k-point.
        let grid = grid_size(&self.basis, self.encut);
        let recip = recip_2pi(&self.basis);
        let mut out_gvecs: Vec<Vec<[i64; 3]>> = Vec::with_capacity(kpts.len());
        for &k in &kpts {
            let gamma = if to_format == WavFormat::Gam { Some(out_axis) } else { None };
            out_gvecs.push(gen_gvecs(&gen_kgrid(grid, gamma), &self.kpts[k - 1], &recip, self.encut));
        }

        let nband_out = bands.len();
        let data_size = self.precision.data_size();
        let max_nplw = out_gvecs.iter().map(Vec::len).max().unwrap_or(0);
        let record_len = (max_nplw * data_size).max((4 + 3 * nband_out) * 8) as u64;

        let mut out = AtomicFile::create(path)?;

        let mut rec = vec![0.0f64; (record_len / 8) as usize];
        rec[0] = record_len as f64;
        rec[1] = spins.len() as f64;
        rec[2] = self.precision.rtag() as f64;
        write_f64_record(out.writer(), &rec)?;

        rec.iter_mut().for_each(|v| *v = 0.0);
        rec[0] = kpts.len() as f64;
        rec[1] = nband_out as f64;
        rec[2] = self.encut;
        for i in 0..3 {
            for j in 0..3 {
                rec[3 + 3 * i + j] = self.basis[(i, j)];
            }
        }
        write_f64_record(out.writer(), &rec)?;

        for &s in &spins {
            for (ki, &k) in kpts.iter().enumerate() {
                if cancel.is_cancelled() {
                    out.discard();
                    return Ok(WriteOutcome::Cancelled);
                }
                let nplw_out = out_gvecs[ki].len();
                rec.iter_mut().for_each(|v| *v = 0.0);
                rec[0] = nplw_out as f64;
                rec[1] = self.kpts[k - 1][0];
                rec[2] = self.kpts[k - 1][1];
                rec[3] = self.kpts[k - 1][2];
                for (bi, &b) in bands.iter().enumerate() {
                    let info = self.band_info(s, k, b);
                    rec[4 + 3 * bi] = info.eigenvalue;
                    rec[4 + 3 * bi + 2] = info.occupation;
                }
                write_f64_record(out.writer(), &rec)?;

                for &b in &bands {
                    if cancel.is_cancelled() {
                        out.discard();
                        return Ok(WriteOutcome::Cancelled);
                    }
                    let coeffs = match (self.format, to_format) {
                        (WavFormat::Std, WavFormat::Std) | (WavFormat::Gam, WavFormat::Gam) => {
                            self.read_band(s, k, b)?
                        }
                        (WavFormat::Gam, WavFormat::Std) => {
                            let stored = self.read_band(s, k, b)?;
                            expand_gamma(&stored, &self.gvecs[k - 1], &out_gvecs[ki])
                        }
                        (WavFormat::Std, WavFormat::Gam) => {
                            let stored = self.read_band(s, k, b)?;
                            reduce_to_gamma(&stored, &self.gvecs[k - 1], &out_gvecs[ki])
                        }
                    };
                    write_coeff_record(out.writer(), &coeffs, self.precision, record_len)?;
                }
            }
        }

        out.commit()?;
        Ok(WriteOutcome::Complete)
    }

    /// The inner product `⟨a|b⟩` of two bands, aligning their G-sets by lookup (gamma
    /// forms are re-expanded first). Returns `(|z|, arg z, z)`.
    pub fn overlap(
        &mut self,
        other: &mut PlaneWaves,
        a: (usize, usize, usize),
        b: (usize, usize, usize),
    ) -> Result<(f64, f64, Complex64), WavecarError> {
        let (gv_a, ca) = self.band_std_coeffs(a.0, a.1, a.2)?;
        let (gv_b, cb) = other.band_std_coeffs(b.0, b.1, b.2)?;
        let index: HashMap<[i64; 3], usize> =
            gv_b.iter().enumerate().map(|(i, g)| (*g, i)).collect();
        let mut z = Complex64::new(0.0, 0.0);
        for (g, c) in gv_a.iter().zip(&ca) {
            if let Some(&j) = index.get(g) {
                z += c.conj() * cb[j];
            }
        }
        Ok((z.norm(), z.arg(), z))
    }
}

fn is_gamma_point(k: &[f64; 3]) -> bool {
    k.iter().all(|v| v.abs() < 1e-12)
}

fn resolve_selection(
    requested: &Option<Vec<usize>>,
    max: usize,
    what: &str,
) -> Result<Vec<usize>, WavecarError> {
    match requested {
        None => Ok((1..=max).collect()),
        Some(list) => {
            if list.is_empty() || list.iter().any(|&i| i == 0 || i > max) {
                Err(WavecarError::InvalidConversion(format!(
                    "{what} selection out of range 1..={max}"
                )))
            } else {
                Ok(list.clone())
            }
        }
    }
}

/// `2π (Bᵀ)⁻¹`: rows are the reciprocal lattice vectors in 1/Å.
fn recip_2pi(basis: &Matrix3<f64>) -> Matrix3<f64> {
    basis.try_inverse().expect("wavecar basis is invertible").transpose()
        * (2.0 * std::f64::consts::PI)
}

/// The rectangular grid large enough to hold the cutoff sphere.
fn grid_size(basis: &Matrix3<f64>, encut: f64) -> [i64; 3] {
    let mut out = [0i64; 3];
    for i in 0..3 {
        let len = basis.row(i).norm();
        let g = (encut / RY_TO_EV).sqrt() * len / AU_TO_ANGSTROM / (2.0 * std::f64::consts::PI);
        out[i] = (g.ceil() as i64) * 2 + 1;
    }
    out
}

/// All grid points in the canonical scan order (x fastest within y within z), with the
/// half-grid filter applied for the gamma variant: the kept representative of each
/// `{G, −G}` pair is lexicographically positive along the chosen axis.
fn gen_kgrid(grid: [i64; 3], gamma: Option<GammaAxis>) -> Vec<[i64; 3]> {
    let range = |n: i64| -> std::ops::Range<i64> { (-(n / 2))..(n - n / 2) };
    let keep = |g: &[i64; 3]| -> bool {
        match gamma {
            None => true,
            Some(GammaAxis::X) => {
                g[0] > 0
                    || (g[0] == 0 && g[1] > 0)
                    || (g[0] == 0 && g[1] == 0 && g[2] >= 0)
            }
            Some(GammaAxis::Y) => {
                g[1] > 0
                    || (g[1] == 0 && g[0] > 0)
                    || (g[1] == 0 && g[0] == 0 && g[2] >= 0)
            }
            Some(GammaAxis::Z) => {
                g[2] > 0
                    || (g[2] == 0 && g[1] > 0)
                    || (g[2] == 0 && g[1] == 0 && g[0] >= 0)
            }
        }
    };
    let mut out = Vec::new();
    for z in range(grid[2]) {
        for y in range(grid[1]) {
            for x in range(grid[0]) {
                let g = [x, y, z];
                if keep(&g) {
                    out.push(g);
                }
            }
        }
    }
    out
}

/// Grid points whose kinetic energy at `k+G` stays under the cutoff.
fn gen_gvecs(
    kgrid: &[[i64; 3]],
    kvec: &[f64; 3],
    recip: &Matrix3<f64>,
    encut: f64,
) -> Vec<[i64; 3]> {
    kgrid
        .iter()
        .filter(|g| {
            let mut cart = Vector3::zeros();
            for i in 0..3 {
                cart += recip.row(i).transpose() * (g[i] as f64 + kvec[i]);
            }
            KINE_PREFACTOR * cart.norm_squared() < encut
        })
        .copied()
        .collect()
}

/// Expands a gamma half-sphere to the full sphere: the missing half is filled by complex
/// conjugation, and the √2 storage scaling is undone (the G = 0 term is stored unscaled).
fn expand_gamma(
    stored: &[Complex64],
    gam_gvecs: &[[i64; 3]],
    std_gvecs: &[[i64; 3]],
) -> Vec<Complex64> {
    let sqrt2 = std::f64::consts::SQRT_2;
    let index: HashMap<[i64; 3], usize> =
        gam_gvecs.iter().enumerate().map(|(i, g)| (*g, i)).collect();
    std_gvecs
        .iter()
        .map(|g| {
            if let Some(&i) = index.get(g) {
                if *g == [0, 0, 0] {
                    stored[i]
                } else {
                    stored[i] / sqrt2
                }
            } else {
                let neg = [-g[0], -g[1], -g[2]];
                let i = index[&neg];
                (stored[i] / sqrt2).conj()
            }
        })
        .collect()
}

/// Keeps the half-sphere of a full-sphere coefficient set, applying the √2 storage
/// scaling. Only meaningful at the gamma point, where `c(−G) = c*(G)`.
fn reduce_to_gamma(
    full: &[Complex64],
    std_gvecs: &[[i64; 3]],
    gam_gvecs: &[[i64; 3]],
) -> Vec<Complex64> {
    let sqrt2 = std::f64::consts::SQRT_2;
    let index: HashMap<[i64; 3], usize> =
        std_gvecs.iter().enumerate().map(|(i, g)| (*g, i)).collect();
    gam_gvecs
        .iter()
        .map(|g| {
            let c = full[index[g]];
            if *g == [0, 0, 0] {
                c
            } else {
                c * sqrt2
            }
        })
        .collect()
}

/// Decides std vs gam by comparing the stored plane-wave counts against the two
/// candidate G-set sizes, and returns the per-k G-vector lists.
fn detect_format(
    basis: &Matrix3<f64>,
    encut: f64,
    grid: [i64; 3],
    kpts: &[[f64; 3]],
    nplw: &[usize],
    gamma_axis: GammaAxis,
) -> Result<(WavFormat, Vec<Vec<[i64; 3]>>), WavecarError> {
    let recip = recip_2pi(basis);
    let single_gamma = kpts.len() == 1 && is_gamma_point(&kpts[0]);

    let std_sets: Vec<Vec<[i64; 3]>> = kpts
        .iter()
        .map(|k| gen_gvecs(&gen_kgrid(grid, None), k, &recip, encut))
        .collect();

    if single_gamma {
        let gam_set = gen_gvecs(&gen_kgrid(grid, Some(gamma_axis)), &kpts[0], &recip, encut);
        if nplw[0] == std_sets[0].len() {
            return Ok((WavFormat::Std, std_sets));
        }
        if nplw[0] == gam_set.len() {
            return Ok((WavFormat::Gam, vec![gam_set]));
        }
        return Err(WavecarError::CorruptRecord(format!(
            "plane-wave count {} matches neither std ({}) nor gamma ({})",
            nplw[0],
            std_sets[0].len(),
            gam_set.len()
        )));
    }

    for (k, set) in std_sets.iter().enumerate() {
        if nplw[k] != set.len() {
            return Err(WavecarError::CorruptRecord(format!(
                "k-point {} stores {} plane waves, cutoff sphere has {}",
                k + 1,
                nplw[k],
                set.len()
            )));
        }
    }
    Ok((WavFormat::Std, std_sets))
}

fn read_f64s(file: &mut File, count: usize) -> Result<Vec<f64>, WavecarError> {
    let buf = read_bytes(file, count * 8)?;
    Ok(buf.chunks_exact(8).map(LittleEndian::read_f64).collect())
}

fn read_f32s(file: &mut File, count: usize) -> Result<Vec<f32>, WavecarError> {
    let buf = read_bytes(file, count * 4)?;
    Ok(buf.chunks_exact(4).map(LittleEndian::read_f32).collect())
}

fn read_bytes(file: &mut File, expected: usize) -> Result<Vec<u8>, WavecarError> {
    let mut buf = vec![0u8; expected];
    let mut got = 0;
    while got < expected {
        match file.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if got < expected {
        return Err(WavecarError::TruncatedRecord {
            expected: expected as u64,
            got: got as u64,
        });
    }
    Ok(buf)
}

fn write_f64_record(w: &mut impl Write, rec: &[f64]) -> Result<(), WavecarError> {
    let mut buf = vec![0u8; rec.len() * 8];
    for (chunk, v) in buf.chunks_exact_mut(8).zip(rec) {
        LittleEndian::write_f64(chunk, *v);
    }
    w.write_all(&buf)?;
    Ok(())
}

fn write_coeff_record(
    w: &mut impl Write,
    coeffs: &[Complex64],
    precision: Precision,
    record_len: u64,
) -> Result<(), WavecarError> {
    let mut buf = vec![0u8; record_len as usize];
    match precision {
        Precision::Double => {
            for (chunk, c) in buf.chunks_exact_mut(16).zip(coeffs) {
                LittleEndian::write_f64(&mut chunk[..8], c.re);
                LittleEndian::write_f64(&mut chunk[8..], c.im);
            }
        }
        Precision::Single => {
            for (chunk, c) in buf.chunks_exact_mut(8).zip(coeffs) {
                LittleEndian::write_f32(&mut chunk[..4], c.re as f32);
                LittleEndian::write_f32(&mut chunk[4..], c.im as f32);
            }
        }
    }
    w.write_all(&buf)?;
    Ok(())
}
