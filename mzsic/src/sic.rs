//! Building selected ion chromatograms for every parent ion and finding their peaks.
//!
//! Parent ions are sorted by m/z and grouped into shared search windows, and the windows
//! are batched into chunks whose working arrays stay under a memory limit. For each chunk
//! every survey scan is read once and every window's intensity is taken from it. Each
//! window's trace then gets noise statistics, one shared search for its largest peak, and
//! an individual search for any parent ion that peak did not cover.
use std::io;

use tracing::{debug, info, warn};

pub mod chunk;
pub mod details;

use crate::cache::SpectrumSource;
use crate::error::SicError;
use crate::options::{PeakFinderOptions, SicOptions};
use crate::parent_ion::{ParentIon, SicPeak, SicPotentialAreaStats, SicStats};
use crate::peak_finder::{
    lookup_noise_stats_for_segment, BasicPeakFinder, NoiseSegment, PeakFinder, PeakSearchResult,
};
use crate::progress::{AbortFlag, ProgressRecord, ABORT_POLL_INTERVAL};
use crate::scan::{ScanList, ScanType};

pub use chunk::{
    create_mz_lookup_list, group_mz_bins, max_groups_per_chunk, MzBinInfo, MzSearchChunk,
    MzSearchGroup,
};
pub use details::{extract_sic_details_from_full_sic, PeakWidthLimits, SicDataPoint, SicDetails};

/// Receives each parent ion's SIC once its peak has been stored
pub trait SicResultSink {
    fn accept(
        &mut self,
        parent_ion_index: usize,
        parent_ion: &ParentIon,
        details: &SicDetails,
        smoothed: &[f64],
    ) -> io::Result<()>;
}

impl SicResultSink for () {
    fn accept(&mut self, _: usize, _: &ParentIon, _: &SicDetails, _: &[f64]) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct CollectedSic {
    pub parent_ion_index: usize,
    pub details: SicDetails,
    pub smoothed: Vec<f64>,
}

impl SicResultSink for Vec<CollectedSic> {
    fn accept(
        &mut self,
        parent_ion_index: usize,
        _parent_ion: &ParentIon,
        details: &SicDetails,
        smoothed: &[f64],
    ) -> io::Result<()> {
        self.push(CollectedSic {
            parent_ion_index,
            details: details.clone(),
            smoothed: smoothed.to_vec(),
        });
        Ok(())
    }
}

/// One group's full trace and the per-scan arrays aligned with it
struct FullTrace<'a> {
    intensities: &'a [f64],
    masses: &'a [f64],
    times: &'a [f64],
    scan_numbers: &'a [i32],
    survey_indices: &'a [usize],
    segments: &'a [NoiseSegment],
    area_stats: SicPotentialAreaStats,
}

/// The outcome of searching one window of a full trace
struct WindowPeak {
    start: usize,
    details: SicDetails,
    peak: SicPeak,
    search: PeakSearchResult,
}

impl WindowPeak {
    fn covers(&self, position: usize) -> bool {
        self.search.found
            && self.start + self.peak.index_base_left <= position
            && position <= self.start + self.peak.index_base_right
    }
}

/// Take the peak found for a SIC and store it in a parent ion, synthesizing a one-point
/// peak at the observed scan when the search found nothing.
///
/// `frag_scan_number` is the scan whose parent ion intensity is recorded. Returns whether
/// the peak had to be synthesized.
pub fn store_peak_in_parent_ion<P: PeakFinder + ?Sized>(
    peak_finder: &P,
    parent_ion: &mut ParentIon,
    details: &SicDetails,
    mut peak: SicPeak,
    search: &PeakSearchResult,
    frag_scan_number: i32,
) -> bool {
    if details.is_empty() {
        parent_ion.sic_stats = SicStats::default();
        return true;
    }
    peak.index_observed = peak.index_observed.min(details.len() - 1);
    let synthesized = !search.found;
    if synthesized {
        let observed = &details.points[peak.index_observed];
        let noise = peak.baseline_noise_stats.noise_level;
        peak.index_max = peak.index_observed;
        peak.index_base_left = peak.index_observed;
        peak.index_base_right = peak.index_observed;
        peak.max_intensity_value = observed.intensity;
        peak.area = observed.intensity;
        peak.signal_to_noise_ratio = if noise > 0.0 {
            observed.intensity / noise
        } else {
            observed.intensity
        };
        peak.fwhm_scans = 0;
    }
    peak.parent_ion_intensity =
        peak_finder.compute_parent_ion_intensity(details, &peak, frag_scan_number);

    let stats = &mut parent_ion.sic_stats;
    stats.scan_type_for_peak_indices = details.scan_type;
    stats.peak_scan_index_start = details.points[peak.index_base_left].scan_index;
    stats.peak_scan_index_end = details.points[peak.index_base_right].scan_index;
    stats.peak_scan_index_max = details.points[peak.index_max].scan_index;
    stats.potential_area_stats = search.area_stats_for_peak;
    stats.peak_found = !synthesized;
    parent_ion.optimal_peak_apex_scan_number = details.points[peak.index_max].scan_number;
    stats.peak = peak;
    synthesized
}

/// Builds SICs for the parent ions of a [`ScanList`] from the survey scans of a spectrum source
#[derive(Debug, Clone)]
pub struct SicBuilder<P: PeakFinder = BasicPeakFinder> {
    options: SicOptions,
    peak_finder: P,
    abort: AbortFlag,
}

impl SicBuilder<BasicPeakFinder> {
    pub fn new(options: &SicOptions, peak_finder_options: &PeakFinderOptions) -> Self {
        Self::with_peak_finder(options, BasicPeakFinder::new(peak_finder_options.clone()))
    }
}

impl<P: PeakFinder> SicBuilder<P> {
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

    pub fn options(&self) -> &SicOptions {
        &self.options
    }

    pub fn peak_finder(&self) -> &P {
        &self.peak_finder
    }

    /// Build the SIC of every parent ion that uses survey scan traces and store its peak.
    ///
    /// Parent ions are processed once per SIM window, plus once for those from regular
    /// survey scans. MRM and DIA parent ions are skipped. If the abort flag is raised the
    /// scan list is marked incomplete and the progress so far is returned.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn build_sics<S: SpectrumSource + ?Sized, K: SicResultSink + ?Sized>(
        &self,
        scan_list: &mut ScanList,
        spectra: &mut S,
        sink: &mut K,
    ) -> Result<ProgressRecord, SicError> {
        let mut progress = ProgressRecord::default();
        let sim_data_present = scan_list.sim_data_present();
        let mut passes = vec![None];
        passes.extend(scan_list.sim_indices().into_iter().map(Some));

        for sim_index in passes {
            let survey_indices = scan_list.survey_scan_indices_for(sim_index);
            let bins = create_mz_lookup_list(
                &scan_list.parent_ions,
                &self.options,
                sim_index,
                |i| scan_list.survey_scans.get(i).and_then(|s| s.sim_index),
            );
            if bins.is_empty() {
                continue;
            }
            if survey_indices.is_empty() {
                return Err(SicError::InvalidChunkIndex(format!(
                    "{} parent ions refer to SIM window {sim_index:?} which has no survey scans",
                    bins.len()
                )));
            }
            let groups = group_mz_bins(&bins);
            let step = max_groups_per_chunk(survey_indices.len(), self.options.chunk_memory_limit_bytes);
            debug!(
                "Building SICs for {} parent ions in {} groups over {} survey scans (SIM window {sim_index:?})",
                bins.len(),
                groups.len(),
                survey_indices.len()
            );

            for chunk_groups in groups.chunks(step) {
                let mut chunk = MzSearchChunk::new(chunk_groups.to_vec(), survey_indices.len());
                self.fill_chunk(&mut chunk, scan_list, &survey_indices, spectra)?;
                let finished = self.process_chunk(
                    &chunk,
                    &bins,
                    &survey_indices,
                    scan_list,
                    sink,
                    sim_data_present,
                    &mut progress,
                )?;
                progress.chunks += 1;
                if !finished || self.abort.is_aborted() {
                    info!("SIC building was cancelled after {} chunks", progress.chunks);
                    scan_list.processing_incomplete = true;
                    return Ok(progress);
                }
            }
        }
        debug!(
            "Built SICs for {} parent ions, {} peaks found and {} synthesized",
            progress.parent_ions_processed, progress.peaks_found, progress.peaks_synthesized
        );
        Ok(progress)
    }

    /// Read every survey scan once and accumulate it into every group of the chunk
    fn fill_chunk<S: SpectrumSource + ?Sized>(
        &self,
        chunk: &mut MzSearchChunk,
        scan_list: &ScanList,
        survey_indices: &[usize],
        spectra: &mut S,
    ) -> Result<(), SicError> {
        for survey_index in survey_indices.iter().copied() {
            let scan = &scan_list.survey_scans[survey_index];
            let spectrum = spectra
                .get_spectrum(scan.scan_number, true)?
                .ok_or(SicError::UncachingSpectrum(scan.scan_number))?;
            let minimum_positive = if scan.minimum_positive_intensity > 0.0 {
                scan.minimum_positive_intensity
            } else {
                spectrum.minimum_positive_intensity()
            };
            chunk.accumulate_scan(spectrum, &self.options, minimum_positive);
        }
        Ok(())
    }

    fn observed_position(
        &self,
        survey_indices: &[usize],
        parent_ion_index: usize,
        survey_scan_index: usize,
    ) -> usize {
        match survey_indices.binary_search(&survey_scan_index) {
            Ok(pos) => pos,
            Err(_) => {
                warn!(
                    "Survey scan index {survey_scan_index} of parent ion {parent_ion_index} was not found in its SIC, using 0"
                );
                0
            }
        }
    }

    fn limits_for(&self, parent_ion: &ParentIon) -> PeakWidthLimits {
        let limits = PeakWidthLimits::from_options(&self.options);
        if parent_ion.custom_sic_peak {
            limits.widened_for_custom(parent_ion.custom_sic_peak_time_tolerance)
        } else {
            limits
        }
    }

    fn search_window(
        &self,
        full: &FullTrace,
        observed: usize,
        limits: &PeakWidthLimits,
        prefer_largest: bool,
        sim_data_present: bool,
    ) -> WindowPeak {
        let noise = lookup_noise_stats_for_segment(observed, full.segments);
        let (start, end) = extract_sic_details_from_full_sic(
            full.intensities,
            full.times,
            observed,
            noise.noise_level,
            limits,
        );
        let mut details = SicDetails::new(ScanType::Survey);
        for pos in start..=end {
            details.push(SicDataPoint {
                scan_index: full.survey_indices[pos],
                scan_number: full.scan_numbers[pos],
                scan_time: full.times[pos],
                intensity: full.intensities[pos],
                mass: full.masses[pos],
            });
        }
        let mut peak = SicPeak {
            index_observed: observed.saturating_sub(start),
            baseline_noise_stats: noise,
            ..Default::default()
        };
        let search = self.peak_finder.find_peak_and_area(
            &details,
            &mut peak,
            &full.area_stats,
            prefer_largest,
            sim_data_present,
        );
        WindowPeak {
            start,
            details,
            peak,
            search,
        }
    }

    fn fragmentation_scan_number(&self, scan_list: &ScanList, parent_ion: &ParentIon) -> i32 {
        parent_ion
            .fragmentation_scan_indices
            .first()
            .and_then(|i| scan_list.fragmentation_scans.get(*i))
            .or_else(|| scan_list.survey_scans.get(parent_ion.survey_scan_index))
            .map(|s| s.scan_number)
            .unwrap_or_default()
    }

    fn store<K: SicResultSink + ?Sized>(
        &self,
        scan_list: &mut ScanList,
        parent_ion_index: usize,
        window: &WindowPeak,
        observed: usize,
        sink: &mut K,
        progress: &mut ProgressRecord,
    ) -> Result<(), SicError> {
        let frag_scan_number =
            self.fragmentation_scan_number(scan_list, &scan_list.parent_ions[parent_ion_index]);
        let mut peak = window.peak.clone();
        peak.index_observed = observed.saturating_sub(window.start);
        let parent_ion = &mut scan_list.parent_ions[parent_ion_index];
        let synthesized = store_peak_in_parent_ion(
            &self.peak_finder,
            parent_ion,
            &window.details,
            peak,
            &window.search,
            frag_scan_number,
        );
        if synthesized {
            progress.peaks_synthesized += 1;
        } else {
            progress.peaks_found += 1;
        }
        progress.parent_ions_processed += 1;
        sink.accept(
            parent_ion_index,
            parent_ion,
            &window.details,
            &window.search.smoothed,
        )?;
        Ok(())
    }

    /// Find and store the peaks of every group in a filled chunk. Returns `false` if the
    /// abort flag was observed part way through.
    #[allow(clippy::too_many_arguments)]
    fn process_chunk<K: SicResultSink + ?Sized>(
        &self,
        chunk: &MzSearchChunk,
        bins: &[MzBinInfo],
        survey_indices: &[usize],
        scan_list: &mut ScanList,
        sink: &mut K,
        sim_data_present: bool,
        progress: &mut ProgressRecord,
    ) -> Result<bool, SicError> {
        let times: Vec<f64> = survey_indices
            .iter()
            .map(|i| scan_list.survey_scans[*i].scan_time)
            .collect();
        let scan_numbers: Vec<i32> = survey_indices
            .iter()
            .map(|i| scan_list.survey_scans[*i].scan_number)
            .collect();

        for (g, group) in chunk.groups.iter().enumerate() {
            let intensities = &chunk.intensities[g];
            if intensities.len() != survey_indices.len() {
                return Err(SicError::InvalidChunkIndex(format!(
                    "group {g} has {} points for {} survey scans",
                    intensities.len(),
                    survey_indices.len()
                )));
            }
            let segments = self
                .peak_finder
                .compute_noise_level(intensities, 0, intensities.len().saturating_sub(1))
                .map_err(|source| SicError::NoiseStatistics {
                    mz: group.search_mz,
                    source,
                })?;
            let full = FullTrace {
                intensities,
                masses: &chunk.masses[g],
                times: &times,
                scan_numbers: &scan_numbers,
                survey_indices,
                segments: &segments,
                area_stats: self.peak_finder.find_potential_peak_area(intensities),
            };

            let members: Vec<(usize, usize)> = bins
                .get(group.mz_index_start..=group.mz_index_end)
                .ok_or_else(|| {
                    SicError::InvalidChunkIndex(format!(
                        "group bins {}..={} exceed {} bins",
                        group.mz_index_start,
                        group.mz_index_end,
                        bins.len()
                    ))
                })?
                .iter()
                .map(|b| {
                    let survey_scan_index = scan_list.parent_ions[b.parent_ion_index].survey_scan_index;
                    (
                        b.parent_ion_index,
                        self.observed_position(survey_indices, b.parent_ion_index, survey_scan_index),
                    )
                })
                .collect();

            // The member observed at the most intense point anchors the shared search
            let anchor = members
                .iter()
                .copied()
                .reduce(|best, m| {
                    if intensities[m.1] > intensities[best.1] {
                        m
                    } else {
                        best
                    }
                });
            let Some((anchor_ion, anchor_pos)) = anchor else {
                continue;
            };
            let shared = self.search_window(
                &full,
                anchor_pos,
                &self.limits_for(&scan_list.parent_ions[anchor_ion]),
                true,
                sim_data_present,
            );

            for (parent_ion_index, observed) in members.iter().copied() {
                if shared.covers(observed) || (parent_ion_index == anchor_ion && !shared.search.found) {
                    self.store(scan_list, parent_ion_index, &shared, observed, sink, progress)?;
                } else {
                    let limits = self.limits_for(&scan_list.parent_ions[parent_ion_index]);
                    let own = self.search_window(&full, observed, &limits, false, sim_data_present);
                    self.store(scan_list, parent_ion_index, &own, observed, sink, progress)?;
                }
                if progress.parent_ions_processed % ABORT_POLL_INTERVAL == 0 && self.abort.is_aborted() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use mzpeaks::Tolerance;

    use super::*;
    use crate::scan::ScanInfo;
    use crate::spectrum::Spectrum;

    fn three_scan_run() -> (ScanList, HashMap<i32, Spectrum>) {
        let mut scans = ScanList::new();
        let mut spectra = HashMap::new();
        for (i, inten) in [10.0, 100.0, 10.0].into_iter().enumerate() {
            let scan_number = i as i32 * 2 + 1;
            let spectrum = Spectrum::from_pairs(scan_number, &[(300.0, 1.0), (500.0, inten)]);
            let mut info = ScanInfo::new(scan_number, i as f64 * 0.1, 1);
            info.update_from_spectrum(&spectrum);
            scans.add_survey_scan(info);
            spectra.insert(scan_number, spectrum);
            scans.add_fragmentation_scan(ScanInfo::new(scan_number + 1, i as f64 * 0.1 + 0.05, 2));
        }
        scans.parent_ions.push(ParentIon {
            fragmentation_scan_indices: vec![1],
            ..ParentIon::new(500.001, 1)
        });
        scans.parent_ions.push(ParentIon {
            fragmentation_scan_indices: vec![1],
            ..ParentIon::new(500.5, 1)
        });
        (scans, spectra)
    }

    fn builder() -> SicBuilder {
        let opts = SicOptions::default().with_tolerance(Tolerance::Da(0.01));
        SicBuilder::new(&opts, &PeakFinderOptions::default())
    }

    #[test_log::test]
    fn test_three_scan_peak() -> Result<(), SicError> {
        let (mut scans, mut spectra) = three_scan_run();
        let mut collected: Vec<CollectedSic> = Vec::new();
        let progress = builder().build_sics(&mut scans, &mut spectra, &mut collected)?;
        assert_eq!(progress.parent_ions_processed, 2);
        assert_eq!(progress.chunks, 1);

        let first = &scans.parent_ions[0];
        assert!(first.sic_stats.peak_found);
        assert_eq!(first.sic_stats.peak.max_intensity_value, 100.0);
        assert_eq!(first.sic_stats.peak_scan_index_max, 1);
        assert_eq!(first.optimal_peak_apex_scan_number, 3);
        assert_eq!(first.sic_stats.peak_scan_index_start, 0);
        assert_eq!(first.sic_stats.peak_scan_index_end, 2);

        let second = &scans.parent_ions[1];
        assert!(!second.sic_stats.peak_found);
        assert_eq!(second.sic_stats.peak.max_intensity_value, 1.0);

        assert_eq!(collected.len(), 2);
        let second_sic = collected.iter().find(|c| c.parent_ion_index == 1).unwrap();
        assert!(second_sic.details.points.iter().all(|p| p.mass == 500.5));
        Ok(())
    }

    #[test]
    fn test_missing_spectrum_is_fatal() {
        let (mut scans, mut spectra) = three_scan_run();
        spectra.remove(&3);
        let err = builder().build_sics(&mut scans, &mut spectra, &mut ()).unwrap_err();
        assert!(matches!(err, SicError::UncachingSpectrum(3)));
    }

    #[test]
    fn test_abort_marks_incomplete() -> Result<(), SicError> {
        let (mut scans, mut spectra) = three_scan_run();
        let flag = AbortFlag::new();
        flag.abort();
        let progress = builder()
            .with_abort_flag(flag)
            .build_sics(&mut scans, &mut spectra, &mut ())?;
        assert!(scans.processing_incomplete);
        assert_eq!(progress.chunks, 1);
        Ok(())
    }

    #[test]
    fn test_skips_mrm_and_dia() -> Result<(), SicError> {
        let (mut scans, mut spectra) = three_scan_run();
        scans.parent_ions[0].is_dia = true;
        scans.parent_ions[1].mrm_daughter_mz = Some(200.0);
        let progress = builder().build_sics(&mut scans, &mut spectra, &mut ())?;
        assert_eq!(progress.parent_ions_processed, 0);
        assert_eq!(progress.chunks, 0);
        Ok(())
    }

    #[test]
    fn test_synthesized_peak() {
        let finder = BasicPeakFinder::default();
        let mut details = SicDetails::new(ScanType::Survey);
        for (i, v) in [3.0, 4.0].into_iter().enumerate() {
            details.push(SicDataPoint {
                scan_index: i + 10,
                scan_number: i as i32 + 20,
                scan_time: 0.0,
                intensity: v,
                mass: 0.0,
            });
        }
        let mut ion = ParentIon::new(100.0, 11);
        let peak = SicPeak {
            index_observed: 1,
            ..Default::default()
        };
        let synthesized =
            store_peak_in_parent_ion(&finder, &mut ion, &details, peak, &PeakSearchResult::default(), 21);
        assert!(synthesized);
        assert_eq!(ion.sic_stats.peak_scan_index_max, 11);
        assert_eq!(ion.sic_stats.peak.area, 4.0);
        assert_eq!(ion.sic_stats.peak.parent_ion_intensity, 4.0);
        assert_eq!(ion.optimal_peak_apex_scan_number, 21);
    }
}
