//! Parent ions and the import-time bookkeeping that deduplicates them.
use mzpeaks::Tolerance;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cache::SpectrumSource;
use crate::error::SpectrumCacheError;
use crate::options::{tolerance_half_width_da, SicOptions};
use crate::scan::{ScanList, ScanType};

/// The baseline noise of a trace or a segment of one
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineNoiseStats {
    pub noise_level: f64,
    pub noise_std_dev: f64,
    pub point_count: usize,
}

/// The smallest area a peak in a trace could plausibly have
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SicPotentialAreaStats {
    pub min_potential_peak_area: f64,
    pub peak_count_basis_for_min_potential_area: usize,
}

/// A chromatographic peak. The indices refer to points of the SIC it was found in.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SicPeak {
    pub index_observed: usize,
    pub index_base_left: usize,
    pub index_base_right: usize,
    pub index_max: usize,
    pub max_intensity_value: f64,
    pub area: f64,
    pub parent_ion_intensity: f64,
    pub signal_to_noise_ratio: f64,
    /// Full width at half maximum, in scan numbers
    pub fwhm_scans: i32,
    pub baseline_noise_stats: BaselineNoiseStats,
}

impl SicPeak {
    pub fn point_count(&self) -> usize {
        self.index_base_right.saturating_sub(self.index_base_left) + 1
    }
}

/// A parent ion's peak, with its bounds translated to scan list indices
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SicStats {
    pub peak: SicPeak,
    pub scan_type_for_peak_indices: ScanType,
    pub peak_scan_index_start: usize,
    pub peak_scan_index_end: usize,
    pub peak_scan_index_max: usize,
    pub potential_area_stats: SicPotentialAreaStats,
    /// Whether `peak` came from a search rather than being synthesized
    pub peak_found: bool,
}

/// A precursor ion tracked across one or more fragmentation events
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentIon {
    pub mz: f64,
    pub survey_scan_index: usize,
    pub fragmentation_scan_indices: Vec<usize>,
    pub mrm_daughter_mz: Option<f64>,
    pub mrm_tolerance_half_width: f64,
    pub custom_sic_peak: bool,
    /// m/z tolerance of a custom SIC peak in Da. Zero means the global SIC tolerance.
    pub custom_sic_peak_mz_tolerance: f64,
    /// Time tolerance of a custom SIC peak in minutes
    pub custom_sic_peak_time_tolerance: f64,
    pub custom_sic_peak_comment: Option<String>,
    pub is_dia: bool,
    pub sic_stats: SicStats,
    pub optimal_peak_apex_scan_number: i32,
    /// Another parent ion whose apex represents this one's elution better
    pub peak_apex_override_parent_ion_index: Option<usize>,
}

impl ParentIon {
    pub fn new(mz: f64, survey_scan_index: usize) -> Self {
        Self {
            mz,
            survey_scan_index,
            ..Default::default()
        }
    }

    pub fn is_mrm(&self) -> bool {
        self.mrm_daughter_mz.is_some()
    }

    /// Eligible for the shared survey scan SIC pass
    pub fn uses_standard_sic(&self) -> bool {
        !(self.is_mrm() || self.is_dia)
    }
}

/// The description of a fragmentation event to attach to a parent ion
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ParentIonCandidate {
    pub survey_scan_index: Option<usize>,
    pub mz: f64,
    pub fragmentation_scan_index: usize,
    pub mrm_daughter_mz: Option<f64>,
    pub mrm_tolerance_half_width: f64,
    pub is_dia: bool,
}

impl ParentIonCandidate {
    pub fn new(survey_scan_index: Option<usize>, mz: f64, fragmentation_scan_index: usize) -> Self {
        Self {
            survey_scan_index,
            mz,
            fragmentation_scan_index,
            ..Default::default()
        }
    }

    pub fn with_mrm(mut self, daughter_mz: f64, tolerance_half_width: f64) -> Self {
        self.mrm_daughter_mz = Some(daughter_mz);
        self.mrm_tolerance_half_width = tolerance_half_width;
        self
    }
}

/// A user-supplied m/z to build a SIC for, regardless of fragmentation
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSicTarget {
    pub mz: f64,
    /// In Da. Zero uses the global SIC tolerance.
    pub mz_tolerance: f64,
    /// Centre of the search window, in minutes
    pub scan_time: f64,
    pub time_tolerance: f64,
    pub comment: Option<String>,
}

/// Builds the parent ion list while scans are imported
#[derive(Debug, Clone)]
pub struct ParentIonTracker {
    tolerance: Tolerance,
    mrm_tolerance: Tolerance,
    refine_reported_mz: bool,
}

impl ParentIonTracker {
    pub fn new(options: &SicOptions) -> Self {
        Self {
            tolerance: options.tolerance(),
            mrm_tolerance: options.mrm_tolerance(),
            refine_reported_mz: options.refine_reported_parent_ion_mz,
        }
    }

    fn matches(&self, ion: &ParentIon, candidate: &ParentIonCandidate) -> bool {
        if ion.is_dia != candidate.is_dia {
            return false;
        }
        let tolerance = if candidate.mrm_daughter_mz.is_some() {
            self.mrm_tolerance
        } else {
            self.tolerance
        };
        if !tolerance.test(candidate.mz, ion.mz) {
            return false;
        }
        match (ion.mrm_daughter_mz, candidate.mrm_daughter_mz) {
            (None, None) => true,
            (Some(a), Some(b)) => tolerance.test(b, a),
            _ => false,
        }
    }

    /// Attach `candidate` to a matching parent ion from the same survey scan, or create a
    /// new parent ion for it.
    ///
    /// Returns the index of the parent ion the fragmentation scan was assigned to, or
    /// `None` when there is no survey scan to attach a new parent ion to. When `spectra`
    /// is given and refinement is enabled, a new parent ion's m/z is replaced by the
    /// closest survey spectrum ion within tolerance.
    pub fn add_or_update_parent_ion<S: SpectrumSource + ?Sized>(
        &self,
        scan_list: &mut ScanList,
        candidate: ParentIonCandidate,
        spectra: Option<&mut S>,
    ) -> Result<Option<usize>, SpectrumCacheError> {
        let survey_scan_index = candidate.survey_scan_index;
        if let Some(survey_index) = survey_scan_index {
            for (i, ion) in scan_list.parent_ions.iter_mut().enumerate().rev() {
                if ion.survey_scan_index < survey_index {
                    break;
                }
                if !self.matches(ion, &candidate) {
                    continue;
                }
                if candidate.mrm_daughter_mz.is_none() {
                    ion.fragmentation_scan_indices
                        .push(candidate.fragmentation_scan_index);
                }
                trace!(
                    "Fragmentation scan {} joined parent ion {i} at m/z {:.4}",
                    candidate.fragmentation_scan_index,
                    ion.mz
                );
                return Ok(Some(i));
            }
        }

        let survey_index = match survey_scan_index {
            Some(i) => i,
            None => {
                debug!(
                    "No survey scan precedes fragmentation scan {}, no parent ion created",
                    candidate.fragmentation_scan_index
                );
                return Ok(None);
            }
        };

        let mut ion = ParentIon::new(candidate.mz, survey_index);
        ion.fragmentation_scan_indices
            .push(candidate.fragmentation_scan_index);
        ion.mrm_daughter_mz = candidate.mrm_daughter_mz;
        ion.mrm_tolerance_half_width = candidate.mrm_tolerance_half_width;
        ion.is_dia = candidate.is_dia;

        let survey_scan = scan_list.survey_scans.get(survey_index);
        if let Some(scan) = survey_scan {
            ion.optimal_peak_apex_scan_number = scan.scan_number;
        }
        if let (true, None, Some(scan), Some(spectra)) = (
            self.refine_reported_mz,
            candidate.mrm_daughter_mz,
            survey_scan,
            spectra,
        ) {
            let width = tolerance_half_width_da(self.tolerance, candidate.mz);
            if let Some(spectrum) = spectra.get_spectrum(scan.scan_number, false)? {
                if let Some((mz, _)) = spectrum.closest_ion(candidate.mz, width) {
                    trace!("Refined parent ion m/z {:.5} to {mz:.5}", candidate.mz);
                    ion.mz = mz;
                }
            }
        }

        scan_list.parent_ions.push(ion);
        Ok(Some(scan_list.parent_ions.len() - 1))
    }

    /// Add a parent ion for a custom SIC target, anchored to the survey scan closest to
    /// its time. Returns `None` when there are no survey scans.
    pub fn add_custom_sic_target(
        &self,
        scan_list: &mut ScanList,
        target: &CustomSicTarget,
    ) -> Option<usize> {
        let survey_index = scan_list
            .survey_scans
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.scan_time - target.scan_time)
                    .abs()
                    .total_cmp(&(b.scan_time - target.scan_time).abs())
            })
            .map(|(i, _)| i)?;
        let mut ion = ParentIon::new(target.mz, survey_index);
        ion.custom_sic_peak = true;
        ion.custom_sic_peak_mz_tolerance = target.mz_tolerance;
        ion.custom_sic_peak_time_tolerance = target.time_tolerance;
        ion.custom_sic_peak_comment = target.comment.clone();
        ion.optimal_peak_apex_scan_number = scan_list.survey_scans[survey_index].scan_number;
        scan_list.parent_ions.push(ion);
        Some(scan_list.parent_ions.len() - 1)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::cache::SpectrumCache;
    use crate::options::SpectrumCacheOptions;
    use crate::scan::ScanInfo;
    use crate::spectrum::Spectrum;

    fn scan_list() -> ScanList {
        let mut scans = ScanList::new();
        scans.add_survey_scan(ScanInfo::new(1, 0.5, 1));
        scans.add_survey_scan(ScanInfo::new(4, 1.0, 1));
        for n in [2, 3, 5, 6] {
            scans.add_fragmentation_scan(ScanInfo::new(n, n as f64 / 4.0, 2));
        }
        scans
    }

    fn tracker() -> ParentIonTracker {
        ParentIonTracker::new(&SicOptions::default().with_tolerance(Tolerance::Da(0.01)))
    }

    #[test]
    fn test_dedup_within_tolerance() -> Result<(), SpectrumCacheError> {
        let mut scans = scan_list();
        let tracker = tracker();
        let a = tracker.add_or_update_parent_ion::<HashMap<i32, Spectrum>>(
            &mut scans,
            ParentIonCandidate::new(Some(0), 500.0, 0),
            None,
        )?;
        let b = tracker.add_or_update_parent_ion::<HashMap<i32, Spectrum>>(
            &mut scans,
            ParentIonCandidate::new(Some(0), 500.005, 1),
            None,
        )?;
        assert_eq!(a, Some(0));
        assert_eq!(b, Some(0));
        assert_eq!(scans.parent_ions.len(), 1);
        assert_eq!(scans.parent_ions[0].fragmentation_scan_indices, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_distinct_outside_tolerance() -> Result<(), SpectrumCacheError> {
        let mut scans = scan_list();
        let tracker = tracker();
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        tracker.add_or_update_parent_ion(&mut scans, ParentIonCandidate::new(Some(0), 500.0, 0), none)?;
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        tracker.add_or_update_parent_ion(&mut scans, ParentIonCandidate::new(Some(0), 500.02, 1), none)?;
        assert_eq!(scans.parent_ions.len(), 2);

        // The same m/z from a later survey scan is a new parent ion
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        let c = tracker.add_or_update_parent_ion(&mut scans, ParentIonCandidate::new(Some(1), 500.0, 2), none)?;
        assert_eq!(c, Some(2));

        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        let d = tracker.add_or_update_parent_ion(&mut scans, ParentIonCandidate::new(None, 500.0, 3), none)?;
        assert_eq!(d, None);
        assert_eq!(scans.parent_ions.len(), 3);
        Ok(())
    }

    #[test]
    fn test_mrm_never_shares_fragmentation_scans() -> Result<(), SpectrumCacheError> {
        let mut scans = scan_list();
        let tracker = tracker();
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        tracker.add_or_update_parent_ion(
            &mut scans,
            ParentIonCandidate::new(Some(0), 500.0, 0).with_mrm(300.0, 0.5),
            none,
        )?;
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        let same = tracker.add_or_update_parent_ion(
            &mut scans,
            ParentIonCandidate::new(Some(0), 500.005, 1).with_mrm(300.0, 0.5),
            none,
        )?;
        assert_eq!(same, Some(0));
        assert_eq!(scans.parent_ions[0].fragmentation_scan_indices, vec![0]);

        // A different daughter m/z is a different transition
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        let other = tracker.add_or_update_parent_ion(
            &mut scans,
            ParentIonCandidate::new(Some(0), 500.0, 2).with_mrm(301.0, 0.5),
            none,
        )?;
        assert_eq!(other, Some(1));
        Ok(())
    }

    #[test]
    fn test_refine_mz() -> Result<(), SpectrumCacheError> {
        let mut scans = scan_list();
        let mut opts = SicOptions::default().with_tolerance(Tolerance::Da(0.05));
        opts.refine_reported_parent_ion_mz = true;
        let tracker = ParentIonTracker::new(&opts);
        let mut spectra = HashMap::new();
        spectra.insert(1, Spectrum::from_pairs(1, &[(499.9, 10.0), (500.012, 50.0)]));
        tracker.add_or_update_parent_ion(
            &mut scans,
            ParentIonCandidate::new(Some(0), 500.0, 0),
            Some(&mut spectra),
        )?;
        assert_eq!(scans.parent_ions[0].mz, 500.012);
        Ok(())
    }

    #[test]
    fn test_dia_scans_keep_separate_parent_ions() -> Result<(), SpectrumCacheError> {
        let mut scans = scan_list();
        let tracker = tracker();
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        tracker.add_or_update_parent_ion(&mut scans, ParentIonCandidate::new(Some(0), 500.0, 0), none)?;
        let mut dia = ParentIonCandidate::new(Some(0), 500.002, 1);
        dia.is_dia = true;
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        let assigned = tracker.add_or_update_parent_ion(&mut scans, dia, none)?;
        assert_eq!(assigned, Some(1));
        assert!(scans.parent_ions[1].is_dia);
        assert_eq!(scans.parent_ions[0].fragmentation_scan_indices, vec![0]);

        let mut dia = ParentIonCandidate::new(Some(0), 500.004, 2);
        dia.is_dia = true;
        let none: Option<&mut HashMap<i32, Spectrum>> = None;
        let assigned = tracker.add_or_update_parent_ion(&mut scans, dia, none)?;
        assert_eq!(assigned, Some(1));
        assert_eq!(scans.parent_ions[1].fragmentation_scan_indices, vec![1, 2]);
        Ok(())
    }

    #[test]
    fn test_refinement_keeps_survey_spectrum_resident() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cache = SpectrumCache::new(SpectrumCacheOptions {
            folder_path: Some(dir.path().to_path_buf()),
            spectra_to_retain_in_memory: 0,
            ..Default::default()
        });
        cache.put(&Spectrum::from_pairs(1, &[(500.012, 50.0)]), 1)?;
        for scan in 100..=(100 + cache.pool_capacity() as i32) {
            cache.put(&Spectrum::from_pairs(scan, &[(300.0, 1.0)]), scan)?;
        }
        assert!(cache.is_paged(1));
        assert!(!cache.is_resident(1));

        let mut scans = scan_list();
        let mut opts = SicOptions::default().with_tolerance(Tolerance::Da(0.05));
        opts.refine_reported_parent_ion_mz = true;
        ParentIonTracker::new(&opts).add_or_update_parent_ion(
            &mut scans,
            ParentIonCandidate::new(Some(0), 500.0, 0),
            Some(&mut cache),
        )?;
        assert_eq!(scans.parent_ions[0].mz, 500.012);
        assert!(cache.is_resident(1));
        Ok(())
    }

    #[test]
    fn test_custom_target() {
        let mut scans = scan_list();
        let target = CustomSicTarget {
            mz: 600.0,
            mz_tolerance: 0.02,
            scan_time: 0.9,
            time_tolerance: 2.0,
            comment: Some("standard".into()),
        };
        let i = tracker().add_custom_sic_target(&mut scans, &target).unwrap();
        let ion = &scans.parent_ions[i];
        assert!(ion.custom_sic_peak);
        assert_eq!(ion.survey_scan_index, 1);
        assert_eq!(ion.optimal_peak_apex_scan_number, 4);
    }
}
