//! Chromatograms for multiple reaction monitoring transitions.
//!
//! MRM data has no survey scans to trace a parent ion through. Instead every fragmentation
//! scan that monitored the same parent and daughter m/z contributes one point to that
//! transition's trace, and the peak found in it is stored in the transition's parent ions.
use mzpeaks::Tolerance;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::cache::SpectrumSource;
use crate::error::{MrmError, SicError};
use crate::options::{PeakFinderOptions, SicOptions};
use crate::parent_ion::{SicPeak, SicPotentialAreaStats};
use crate::peak_finder::{
    lookup_noise_stats_for_segment, BasicPeakFinder, NoiseSegment, PeakFinder, PeakSearchResult,
};
use crate::progress::{AbortFlag, ProgressRecord, ABORT_POLL_INTERVAL};
use crate::scan::{MrmMassRange, ScanList, ScanType};
use crate::sic::{store_peak_in_parent_ion, SicDataPoint, SicDetails, SicResultSink};

/// One monitored parent/daughter pair and the fragmentation scans that recorded it
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct MrmTransition {
    pub parent_mz: f64,
    pub mass_range: MrmMassRange,
    /// Fragmentation scan indices, in acquisition order
    pub scan_indices: Vec<usize>,
}

impl MrmTransition {
    pub fn daughter_mz(&self) -> f64 {
        self.mass_range.central_mz
    }
}

/// The peak found in one transition's trace
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct MrmTransitionResult {
    pub parent_mz: f64,
    pub daughter_mz: f64,
    pub scan_count: usize,
    pub peak_found: bool,
    pub peak: SicPeak,
    /// Scan number of the peak's apex
    pub apex_scan_number: i32,
    pub parent_ion_indices: Vec<usize>,
}

/// Collect the distinct transitions recorded by the MRM fragmentation scans of `scan_list`
pub fn group_mrm_transitions(scan_list: &ScanList, tolerance: Tolerance) -> Vec<MrmTransition> {
    let mut transitions: Vec<MrmTransition> = Vec::new();
    for (i, scan) in scan_list.fragmentation_scans.iter().enumerate() {
        let Some(mrm) = scan.mrm.as_ref() else {
            continue;
        };
        for range in mrm.mass_ranges.iter() {
            let existing = transitions.iter_mut().find(|t| {
                tolerance.test(mrm.parent_mz, t.parent_mz)
                    && tolerance.test(range.central_mz, t.daughter_mz())
            });
            match existing {
                Some(t) => {
                    if t.scan_indices.last() != Some(&i) {
                        t.scan_indices.push(i);
                    }
                }
                None => transitions.push(MrmTransition {
                    parent_mz: mrm.parent_mz,
                    mass_range: *range,
                    scan_indices: vec![i],
                }),
            }
        }
    }
    transitions
}

#[derive(Debug, Clone)]
pub struct MrmProcessor<P: PeakFinder = BasicPeakFinder> {
    options: SicOptions,
    peak_finder: P,
    abort: AbortFlag,
}

impl MrmProcessor<BasicPeakFinder> {
    pub fn new(options: &SicOptions, peak_finder_options: &PeakFinderOptions) -> Self {
        Self::with_peak_finder(options, BasicPeakFinder::new(peak_finder_options.clone()))
    }
}

impl<P: PeakFinder> MrmProcessor<P> {
    pub fn with_peak_finder(options: &SicOptions, peak_finder: P) -> Self {
        Self {
            options: options.clone(),
            peak_finder,
            abort: AbortFlag::default(),
        }
    }

    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    /// Read one transition's full trace from its fragmentation scans
    fn build_trace<S: SpectrumSource + ?Sized>(
        &self,
        scan_list: &ScanList,
        transition: &MrmTransition,
        spectra: &mut S,
    ) -> Result<SicDetails, MrmError> {
        let mut details = SicDetails::new(ScanType::Fragmentation);
        let half_width = transition.mass_range.half_width();
        for scan_index in transition.scan_indices.iter().copied() {
            let scan = &scan_list.fragmentation_scans[scan_index];
            let spectrum = spectra
                .get_spectrum(scan.scan_number, true)?
                .ok_or(SicError::UncachingSpectrum(scan.scan_number))?;
            let agg = spectrum.aggregate_ions_in_range(
                transition.daughter_mz(),
                half_width,
                self.options.ion_aggregation,
            );
            let mut intensity = agg.intensity;
            if intensity <= 0.0 && self.options.replace_sic_zeroes_with_minimum_positive {
                intensity = if scan.minimum_positive_intensity > 0.0 {
                    scan.minimum_positive_intensity
                } else {
                    spectrum.minimum_positive_intensity()
                };
            }
            details.push(SicDataPoint {
                scan_index,
                scan_number: scan.scan_number,
                scan_time: scan.scan_time,
                intensity,
                mass: if agg.ion_count > 0 {
                    agg.closest_mz
                } else {
                    transition.daughter_mz()
                },
            });
        }
        Ok(details)
    }

    fn matching_parent_ions(&self, scan_list: &ScanList, transition: &MrmTransition) -> Vec<usize> {
        let tolerance = self.options.mrm_tolerance();
        scan_list
            .parent_ions
            .iter()
            .enumerate()
            .filter(|(_, ion)| match ion.mrm_daughter_mz {
                Some(daughter) => {
                    tolerance.test(ion.mz, transition.parent_mz)
                        && tolerance.test(daughter, transition.daughter_mz())
                }
                None => false,
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn search(
        &self,
        details: &SicDetails,
        observed: usize,
        noise: &[NoiseSegment],
        area_stats: &SicPotentialAreaStats,
        prefer_largest: bool,
    ) -> (SicPeak, PeakSearchResult) {
        let mut peak = SicPeak {
            index_observed: observed,
            baseline_noise_stats: lookup_noise_stats_for_segment(observed, noise),
            ..Default::default()
        };
        let result = self
            .peak_finder
            .find_peak_and_area(details, &mut peak, area_stats, prefer_largest, false);
        (peak, result)
    }

    /// Build every transition's trace, find its peak, and store the peak in each of the
    /// transition's parent ions.
    ///
    /// Cancellation marks `scan_list` incomplete and returns the transitions done so far.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn process<S: SpectrumSource + ?Sized, K: SicResultSink + ?Sized>(
        &self,
        scan_list: &mut ScanList,
        spectra: &mut S,
        sink: &mut K,
        progress: &mut ProgressRecord,
    ) -> Result<Vec<MrmTransitionResult>, MrmError> {
        let transitions = group_mrm_transitions(scan_list, self.options.mrm_tolerance());
        if transitions.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Processing {} MRM transitions", transitions.len());
        let mut results = Vec::with_capacity(transitions.len());
        let mut ions_seen = 0usize;

        for transition in transitions.iter() {
            if self.abort.is_aborted() {
                info!("MRM processing was cancelled after {} transitions", results.len());
                scan_list.processing_incomplete = true;
                return Ok(results);
            }
            let details = self.build_trace(scan_list, transition, spectra)?;
            let intensities = details.intensities();
            let noise = self
                .peak_finder
                .compute_noise_level(&intensities, 0, intensities.len().saturating_sub(1))
                .map_err(|source| SicError::NoiseStatistics {
                    mz: transition.daughter_mz(),
                    source,
                })?;
            let area_stats = self.peak_finder.find_potential_peak_area(&intensities);

            let most_intense = intensities
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or_default();
            let (peak, search) = self.search(&details, most_intense, &noise, &area_stats, true);
            let parent_ion_indices = self.matching_parent_ions(scan_list, transition);
            trace!(
                "Transition {:.3} -> {:.3} has {} scans and {} parent ions",
                transition.parent_mz,
                transition.daughter_mz(),
                details.len(),
                parent_ion_indices.len()
            );

            for parent_ion_index in parent_ion_indices.iter().copied() {
                let frag_index = scan_list.parent_ions[parent_ion_index]
                    .fragmentation_scan_indices
                    .first()
                    .copied();
                let observed = match frag_index {
                    Some(f) => {
                        if f >= scan_list.fragmentation_scans.len() {
                            return Err(MrmError::InvalidFragmentationScanIndex {
                                parent_ion_index,
                                fragmentation_scan_index: f,
                            });
                        }
                        transition.scan_indices.partition_point(|s| *s < f)
                    }
                    None => most_intense,
                }
                .min(details.len().saturating_sub(1));
                let frag_scan_number = details
                    .get(observed)
                    .map(|p| p.scan_number)
                    .unwrap_or_default();

                let (ion_peak, ion_search) = self.search(&details, observed, &noise, &area_stats, false);
                let ion = &mut scan_list.parent_ions[parent_ion_index];
                let synthesized = store_peak_in_parent_ion(
                    &self.peak_finder,
                    ion,
                    &details,
                    ion_peak,
                    &ion_search,
                    frag_scan_number,
                );
                if synthesized {
                    progress.peaks_synthesized += 1;
                } else {
                    progress.peaks_found += 1;
                }
                progress.parent_ions_processed += 1;
                sink.accept(parent_ion_index, ion, &details, &ion_search.smoothed)
                    .map_err(SicError::from)?;

                ions_seen += 1;
                if ions_seen % ABORT_POLL_INTERVAL == 0 && self.abort.is_aborted() {
                    info!("MRM processing was cancelled after {} transitions", results.len());
                    scan_list.processing_incomplete = true;
                    return Ok(results);
                }
            }

            progress.mrm_transitions += 1;
            results.push(MrmTransitionResult {
                parent_mz: transition.parent_mz,
                daughter_mz: transition.daughter_mz(),
                scan_count: details.len(),
                peak_found: search.found,
                apex_scan_number: details
                    .get(peak.index_max)
                    .map(|p| p.scan_number)
                    .unwrap_or_default(),
                peak,
                parent_ion_indices,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::parent_ion::{ParentIonCandidate, ParentIonTracker};
    use crate::scan::{MrmScanInfo, ScanInfo};
    use crate::sic::CollectedSic;
    use crate::spectrum::Spectrum;

    fn mrm_run() -> (ScanList, HashMap<i32, Spectrum>, SicOptions) {
        let options = SicOptions::default().with_tolerance(Tolerance::Da(0.5));
        let tracker = ParentIonTracker::new(&options);
        let mut scans = ScanList::new();
        let mut spectra = HashMap::new();
        scans.add_survey_scan(ScanInfo::new(1, 0.0, 1));
        let profile = [5.0, 5.0, 40.0, 200.0, 60.0, 5.0, 5.0];
        for (i, inten) in profile.iter().enumerate() {
            let scan_number = i as i32 + 2;
            let mut info = ScanInfo::new(scan_number, 0.1 * (i + 1) as f64, 2);
            info.mrm = Some(MrmScanInfo {
                parent_mz: 600.0,
                mass_ranges: vec![MrmMassRange::new(299.5, 300.5), MrmMassRange::new(399.5, 400.5)],
            });
            let spectrum = Spectrum::from_pairs(scan_number, &[(300.01, *inten), (400.0, 1.0)]);
            info.update_from_spectrum(&spectrum);
            let frag = scans.add_fragmentation_scan(info);
            spectra.insert(scan_number, spectrum);
            for daughter in [300.0, 400.0] {
                let candidate = ParentIonCandidate::new(Some(0), 600.0, frag).with_mrm(daughter, 0.5);
                tracker
                    .add_or_update_parent_ion::<HashMap<i32, Spectrum>>(&mut scans, candidate, None)
                    .unwrap();
            }
        }
        (scans, spectra, options)
    }

    #[test]
    fn test_group_transitions() {
        let (scans, _, options) = mrm_run();
        let transitions = group_mrm_transitions(&scans, options.mrm_tolerance());
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].daughter_mz(), 300.0);
        assert_eq!(transitions[0].scan_indices, (0..7).collect::<Vec<_>>());
        assert_eq!(scans.parent_ions.len(), 2);
    }

    #[test_log::test]
    fn test_process_transitions() -> Result<(), MrmError> {
        let (mut scans, mut spectra, options) = mrm_run();
        let processor = MrmProcessor::new(&options, &PeakFinderOptions::default());
        let mut progress = ProgressRecord::default();
        let mut collected: Vec<CollectedSic> = Vec::new();
        let results = processor.process(&mut scans, &mut spectra, &mut collected, &mut progress)?;
        assert_eq!(results.len(), 2);
        assert_eq!(progress.mrm_transitions, 2);

        let strong = &results[0];
        assert!(strong.peak_found);
        assert_eq!(strong.apex_scan_number, 5);
        assert_eq!(strong.peak.max_intensity_value, 200.0);
        assert_eq!(strong.parent_ion_indices, vec![0]);
        assert!(!results[1].peak_found);

        let ion = &scans.parent_ions[0];
        assert!(ion.sic_stats.peak_found);
        assert_eq!(ion.sic_stats.scan_type_for_peak_indices, ScanType::Fragmentation);
        assert_eq!(ion.sic_stats.peak_scan_index_max, 3);
        assert_eq!(ion.optimal_peak_apex_scan_number, 5);
        assert!(!scans.parent_ions[1].sic_stats.peak_found);
        assert_eq!(collected.len(), 2);
        Ok(())
    }

    #[test]
    fn test_abort_before_start() -> Result<(), MrmError> {
        let (mut scans, mut spectra, options) = mrm_run();
        let flag = AbortFlag::new();
        flag.abort();
        let processor = MrmProcessor::new(&options, &PeakFinderOptions::default()).with_abort_flag(flag);
        let results = processor.process(&mut scans, &mut spectra, &mut (), &mut ProgressRecord::default())?;
        assert!(results.is_empty());
        assert!(scans.processing_incomplete);
        Ok(())
    }
}
