//! Isobaric tag reporter ion extraction from fragmentation spectra
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::SpectrumSource;
use crate::error::SpectrumCacheError;
use crate::options::ReporterIonOptions;
use crate::progress::{AbortFlag, ABORT_POLL_INTERVAL};
use crate::scan::ScanList;
use crate::spectrum::IonAggregation;

const TMT2_MZS: &[f64] = &[126.127726, 127.131081];
const TMT6_MZS: &[f64] = &[
    126.127726, 127.124761, 128.134436, 129.131471, 130.141145, 131.138180,
];
const TMT10_MZS: &[f64] = &[
    126.127726, 127.124761, 127.131081, 128.128116, 128.134436, 129.131471, 129.137790,
    130.134825, 130.141145, 131.138180,
];
const ITRAQ4_MZS: &[f64] = &[114.1112, 115.1082, 116.1116, 117.1149];
const ITRAQ8_MZS: &[f64] = &[
    113.1078, 114.1112, 115.1082, 116.1116, 117.1149, 118.1120, 119.1153, 121.1220,
];

/// Isotope impurity percentages of each iTRAQ 4-plex tag at -2, -1, +1 and +2 Da
const ITRAQ4_IMPURITIES: [[f64; 4]; 4] = [
    [0.0, 1.0, 5.9, 0.2],
    [0.0, 2.0, 5.6, 0.1],
    [0.0, 3.0, 4.5, 0.1],
    [0.1, 4.0, 3.5, 0.1],
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReporterIonMassMode {
    #[default]
    Tmt10,
    Tmt6,
    Tmt2,
    Itraq4,
    Itraq8,
}

impl ReporterIonMassMode {
    pub fn reporter_mzs(&self) -> &'static [f64] {
        match self {
            Self::Tmt2 => TMT2_MZS,
            Self::Tmt6 => TMT6_MZS,
            Self::Tmt10 => TMT10_MZS,
            Self::Itraq4 => ITRAQ4_MZS,
            Self::Itraq8 => ITRAQ8_MZS,
        }
    }

    fn impurities(&self) -> Option<&'static [[f64; 4]]> {
        match self {
            Self::Itraq4 => Some(&ITRAQ4_IMPURITIES),
            _ => None,
        }
    }

    pub fn supports_isotope_correction(&self) -> bool {
        self.impurities().is_some()
    }
}

/// The m/z span that reporter ions of `options` occupy, widened by the tolerance.
///
/// `None` when reporter ions are disabled.
pub fn reporter_ion_exclusion_window(options: &ReporterIonOptions) -> Option<(f64, f64)> {
    if !options.enabled {
        return None;
    }
    let mzs = options.mass_mode.reporter_mzs();
    let lo = mzs.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = mzs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((lo - options.tolerance_da, hi + options.tolerance_da))
}

/// Reporter ion intensities observed in one fragmentation scan, in channel order
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReporterIonScan {
    pub fragmentation_scan_index: usize,
    pub scan_number: i32,
    pub intensities: Vec<f64>,
    pub corrected: bool,
}

/// Remove the isotopic spill-over between adjacent channels. Returns `false` and leaves
/// `intensities` untouched when `mode` has no correction factors.
pub fn correct_isotope_impurities(mode: ReporterIonMassMode, intensities: &mut [f64]) -> bool {
    let Some(impurities) = mode.impurities() else {
        return false;
    };
    let n = impurities.len();
    if intensities.len() != n {
        return false;
    }
    // matrix[(i, j)]: the fraction of channel j's signal observed in channel i
    let mut matrix = DMatrix::<f64>::zeros(n, n);
    for (j, row) in impurities.iter().enumerate() {
        let spilled: f64 = row.iter().sum();
        matrix[(j, j)] = 1.0 - spilled / 100.0;
        for (offset, pct) in [-2isize, -1, 1, 2].into_iter().zip(row.iter()) {
            let i = j as isize + offset;
            if (0..n as isize).contains(&i) {
                matrix[(i as usize, j)] = pct / 100.0;
            }
        }
    }
    unmix(matrix, intensities)
}

/// Solve `matrix * corrected = intensities` in place, clamping negative channels to zero.
/// A singular matrix leaves `intensities` unchanged.
fn unmix(matrix: DMatrix<f64>, intensities: &mut [f64]) -> bool {
    let observed = DVector::from_column_slice(intensities);
    match matrix.lu().solve(&observed) {
        Some(corrected) => {
            for (slot, value) in intensities.iter_mut().zip(corrected.iter().copied()) {
                *slot = value.max(0.0);
            }
            true
        }
        None => false,
    }
}

#[derive(Debug, Clone)]
pub struct ReporterIonExtractor {
    options: ReporterIonOptions,
    abort: AbortFlag,
}

impl ReporterIonExtractor {
    pub fn new(options: &ReporterIonOptions) -> Self {
        Self {
            options: options.clone(),
            abort: AbortFlag::default(),
        }
    }

    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    /// Read each fragmentation scan's reporter ion intensities.
    ///
    /// MRM scans are skipped. Cancellation marks `scan_list` incomplete and returns the
    /// scans read so far.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn extract<S: SpectrumSource + ?Sized>(
        &self,
        scan_list: &mut ScanList,
        spectra: &mut S,
    ) -> Result<Vec<ReporterIonScan>, SpectrumCacheError> {
        if !self.options.enabled {
            return Ok(Vec::new());
        }
        let mode = self.options.mass_mode;
        let reporter_mzs = mode.reporter_mzs();
        let aggregation = if self.options.use_max_abundance_in_window {
            IonAggregation::Max
        } else {
            IonAggregation::Sum
        };
        let correct = self.options.apply_isotope_correction;
        if correct && !mode.supports_isotope_correction() {
            warn!("Isotope correction is not available for {mode:?}, reporting uncorrected intensities");
        }

        let mut results = Vec::with_capacity(scan_list.fragmentation_scans.len());
        for (i, scan) in scan_list.fragmentation_scans.iter().enumerate() {
            if i % ABORT_POLL_INTERVAL == 0 && self.abort.is_aborted() {
                info!("Reporter ion extraction was cancelled after {i} scans");
                scan_list.processing_incomplete = true;
                return Ok(results);
            }
            if scan.is_mrm() {
                continue;
            }
            let Some(spectrum) = spectra.get_spectrum(scan.scan_number, true)? else {
                warn!("Fragmentation scan {} is not in the spectrum cache", scan.scan_number);
                continue;
            };
            let mut intensities: Vec<f64> = reporter_mzs
                .iter()
                .map(|mz| {
                    spectrum
                        .aggregate_ions_in_range(*mz, self.options.tolerance_da, aggregation)
                        .intensity
                })
                .collect();
            let corrected = correct && correct_isotope_impurities(mode, &mut intensities);
            results.push(ReporterIonScan {
                fragmentation_scan_index: i,
                scan_number: scan.scan_number,
                intensities,
                corrected,
            });
        }
        debug!("Extracted {mode:?} reporter ions from {} scans", results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::scan::ScanInfo;
    use crate::spectrum::Spectrum;

    #[test]
    fn test_exclusion_window() {
        let mut opts = ReporterIonOptions::default();
        assert_eq!(reporter_ion_exclusion_window(&opts), None);
        opts.enabled = true;
        opts.mass_mode = ReporterIonMassMode::Itraq4;
        let (lo, hi) = reporter_ion_exclusion_window(&opts).unwrap();
        assert!((lo - (114.1112 - 0.003)).abs() < 1e-9);
        assert!((hi - (117.1149 + 0.003)).abs() < 1e-9);
    }

    #[test]
    fn test_correction_inverts_spill_over() {
        let truth = [1000.0, 2000.0, 500.0, 800.0];
        // Spread the true signal the way the impurities would
        let mut observed = [0.0; 4];
        for (j, row) in ITRAQ4_IMPURITIES.iter().enumerate() {
            let spilled: f64 = row.iter().sum();
            observed[j] += truth[j] * (1.0 - spilled / 100.0);
            for (offset, pct) in [-2isize, -1, 1, 2].into_iter().zip(row.iter()) {
                let i = j as isize + offset;
                if (0..4).contains(&i) {
                    observed[i as usize] += truth[j] * pct / 100.0;
                }
            }
        }
        assert!(correct_isotope_impurities(ReporterIonMassMode::Itraq4, &mut observed));
        for (a, b) in observed.iter().zip(truth) {
            assert!((a - b).abs() < 1e-6, "{a} != {b}");
        }

        let mut tmt = vec![1.0; 10];
        assert!(!correct_isotope_impurities(ReporterIonMassMode::Tmt10, &mut tmt));
        assert_eq!(tmt, vec![1.0; 10]);
    }

    #[test]
    fn test_singular_matrix_keeps_raw() {
        let mut matrix = DMatrix::<f64>::identity(3, 3);
        matrix[(2, 2)] = 0.0;
        let mut intensities = [10.0, 20.0, 30.0];
        assert!(!unmix(matrix, &mut intensities));
        assert_eq!(intensities, [10.0, 20.0, 30.0]);

        let mut matrix = DMatrix::<f64>::identity(2, 2);
        matrix[(0, 1)] = 0.5;
        let mut intensities = [15.0, 10.0];
        assert!(unmix(matrix, &mut intensities));
        assert!((intensities[0] - 10.0).abs() < 1e-9);
        assert!((intensities[1] - 10.0).abs() < 1e-9);
    }

    #[test_log::test]
    fn test_extract() -> Result<(), SpectrumCacheError> {
        let mut scans = ScanList::new();
        scans.add_survey_scan(ScanInfo::new(1, 0.0, 1));
        scans.add_fragmentation_scan(ScanInfo::new(2, 0.01, 2));
        let mut spectra = HashMap::new();
        spectra.insert(
            2,
            Spectrum::from_pairs(2, &[(126.1277, 50.0), (126.1290, 20.0), (131.1382, 7.0), (400.0, 99.0)]),
        );
        let opts = ReporterIonOptions {
            enabled: true,
            mass_mode: ReporterIonMassMode::Tmt6,
            ..Default::default()
        };
        let found = ReporterIonExtractor::new(&opts).extract(&mut scans, &mut spectra)?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].intensities, vec![50.0, 0.0, 0.0, 0.0, 0.0, 7.0]);
        assert!(!found[0].corrected);
        Ok(())
    }
}
