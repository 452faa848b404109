//! Grouping parent ions that co-elute at related m/z values.
//!
//! Isotopes and alternate charge states of one analyte are fragmented separately but share
//! an elution profile and most of their fragment ions. [`SimilarIonGrouper`] clusters them
//! so every member of a cluster reports the apex of its most intense member.
use tracing::{debug, info, warn};

use crate::binning::{bin_spectrum, BinGrid};
use crate::cache::SpectrumSource;
use crate::correlation::{correlate, CorrelationMethod};
use crate::error::SimilarityError;
use crate::options::{
    tolerance_half_width_da, BinningOptions, ReporterIonOptions, SicPipelineOptions, SimilarityOptions,
};
use crate::parent_ion::ParentIon;
use crate::progress::{AbortFlag, ProgressRecord, ABORT_POLL_INTERVAL};
use crate::reporter::reporter_ion_exclusion_window;
use crate::scan::{ScanList, ScanType};
use crate::search_range::{SearchEntry, SearchRange};

/// The SIC tolerance, in Da, at or below which one-third charge spacing is also searched
const THIRDS_MAXIMUM_SIC_TOLERANCE_DA: f64 = 0.25;
/// The m/z half-width at or below which one-third charge spacing is also searched
const THIRDS_MAXIMUM_HALF_WIDTH: f64 = 0.15;

/// One fragmentation spectrum binned on the normal grid and on the grid offset by half a bin
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BinnedSpectrum {
    pub scan_number: i32,
    pub bins: Vec<f64>,
    pub offset_bins: Vec<f64>,
}

/// Scores the similarity of the fragmentation spectra of two parent ions
#[derive(Debug, Clone)]
pub struct FragSpectrumComparer {
    binning: BinningOptions,
    grid: BinGrid,
    offset_grid: BinGrid,
    exclusions: Vec<(f64, f64)>,
    method: CorrelationMethod,
}

impl FragSpectrumComparer {
    pub fn new(binning: &BinningOptions, reporter_ions: &ReporterIonOptions) -> Self {
        Self {
            binning: binning.clone(),
            grid: BinGrid::new(binning, 0.0),
            offset_grid: BinGrid::new(binning, 0.5),
            exclusions: reporter_ion_exclusion_window(reporter_ions).into_iter().collect(),
            method: CorrelationMethod::Pearson,
        }
    }

    pub fn with_method(mut self, method: CorrelationMethod) -> Self {
        self.method = method;
        self
    }

    /// Whether a parent ion has fragmentation spectra that can be compared at all
    pub fn is_comparable(parent_ion: &ParentIon) -> bool {
        !(parent_ion.custom_sic_peak || parent_ion.is_mrm())
    }

    /// Bin every fragmentation spectrum of one parent ion. Each spectrum is binned before
    /// the next is requested, so a spectrum borrowed from the cache is never held across
    /// another request.
    pub fn bin_parent_ion_spectra<S: SpectrumSource + ?Sized>(
        &self,
        scan_list: &ScanList,
        parent_ion_index: usize,
        spectra: &mut S,
    ) -> Result<Vec<BinnedSpectrum>, SimilarityError> {
        let parent_ion = scan_list
            .parent_ions
            .get(parent_ion_index)
            .ok_or(SimilarityError::InvalidParentIonIndex(parent_ion_index))?;
        let mut binned = Vec::with_capacity(parent_ion.fragmentation_scan_indices.len());
        for frag_index in parent_ion.fragmentation_scan_indices.iter() {
            let Some(scan) = scan_list.fragmentation_scans.get(*frag_index) else {
                warn!("Parent ion {parent_ion_index} refers to missing fragmentation scan {frag_index}");
                continue;
            };
            let Some(spectrum) = spectra.get_spectrum(scan.scan_number, false)? else {
                warn!("Fragmentation scan {} is not in the spectrum cache", scan.scan_number);
                continue;
            };
            binned.push(BinnedSpectrum {
                scan_number: scan.scan_number,
                bins: bin_spectrum(spectrum, &self.grid, &self.binning, &self.exclusions),
                offset_bins: bin_spectrum(spectrum, &self.offset_grid, &self.binning, &self.exclusions),
            });
        }
        Ok(binned)
    }

    /// The best correlation over every pairing of spectra, taking the better of the two
    /// grids for each pair
    pub fn best_correlation(&self, a: &[BinnedSpectrum], b: &[BinnedSpectrum]) -> f64 {
        let mut best = 0.0f64;
        for x in a {
            for y in b {
                let normal = correlate(&x.bins, &y.bins, self.method);
                let offset = correlate(&x.offset_bins, &y.offset_bins, self.method);
                best = best.max(normal).max(offset);
            }
        }
        best
    }

    /// The similarity of the fragmentation spectra of two parent ions, zero when either is
    /// a custom SIC target or an MRM transition
    pub fn compare_frag_spectra<S: SpectrumSource + ?Sized>(
        &self,
        scan_list: &ScanList,
        parent_ion_a: usize,
        parent_ion_b: usize,
        spectra: &mut S,
    ) -> Result<f64, SimilarityError> {
        for idx in [parent_ion_a, parent_ion_b] {
            let ion = scan_list
                .parent_ions
                .get(idx)
                .ok_or(SimilarityError::InvalidParentIonIndex(idx))?;
            if !Self::is_comparable(ion) {
                return Ok(0.0);
            }
        }
        let a = self.bin_parent_ion_spectra(scan_list, parent_ion_a, spectra)?;
        let b = self.bin_parent_ion_spectra(scan_list, parent_ion_b, spectra)?;
        Ok(self.best_correlation(&a, &b))
    }
}

/// A cluster of similar parent ions
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct UniqueMzListItem {
    /// The running average m/z, with each member corrected back by its offset
    pub mz_avg: f64,
    pub match_count: usize,
    pub parent_ion_indices: Vec<usize>,
    pub max_intensity: f64,
    pub max_intensity_parent_ion_index: usize,
    pub max_area: f64,
    pub max_area_parent_ion_index: usize,
}

impl UniqueMzListItem {
    fn seeded(parent_ion_index: usize, parent_ion: &ParentIon) -> Self {
        let peak = &parent_ion.sic_stats.peak;
        Self {
            mz_avg: parent_ion.mz,
            match_count: 1,
            parent_ion_indices: vec![parent_ion_index],
            max_intensity: peak.max_intensity_value,
            max_intensity_parent_ion_index: parent_ion_index,
            max_area: peak.area,
            max_area_parent_ion_index: parent_ion_index,
        }
    }

    fn merge(&mut self, parent_ion_index: usize, parent_ion: &ParentIon, offset: f64) {
        let n = self.match_count as f64;
        self.mz_avg = (self.mz_avg * n + (parent_ion.mz - offset)) / (n + 1.0);
        self.match_count += 1;
        self.parent_ion_indices.push(parent_ion_index);
        let peak = &parent_ion.sic_stats.peak;
        if peak.max_intensity_value > self.max_intensity {
            self.max_intensity = peak.max_intensity_value;
            self.max_intensity_parent_ion_index = parent_ion_index;
        }
        if peak.area > self.max_area {
            self.max_area = peak.area;
            self.max_area_parent_ion_index = parent_ion_index;
        }
    }
}

fn round_mz(mz: f64) -> f64 {
    (mz * 100.0).round() / 100.0
}

/// When and where a parent ion's SIC peak reached its maximum
fn peak_apex(scan_list: &ScanList, parent_ion: &ParentIon) -> (f64, i32) {
    let stats = &parent_ion.sic_stats;
    scan_list
        .scan(stats.scan_type_for_peak_indices, stats.peak_scan_index_max)
        .or_else(|| scan_list.scan(ScanType::Survey, parent_ion.survey_scan_index))
        .map(|s| (s.scan_time, s.scan_number))
        .unwrap_or_default()
}

/// The elution time difference in minutes. When neither scan has a time, the scan number
/// difference is used assuming one scan per second.
fn elution_time_difference(a: (f64, i32), b: (f64, i32)) -> f64 {
    if a.0 == 0.0 && b.0 == 0.0 {
        (a.1 - b.1).abs() as f64 / 60.0
    } else {
        (a.0 - b.0).abs()
    }
}

#[derive(Debug, Clone)]
pub struct SimilarIonGrouper {
    options: SimilarityOptions,
    sic_tolerance: mzpeaks::Tolerance,
    limit_search_to_custom_mzs: bool,
    comparer: FragSpectrumComparer,
    abort: AbortFlag,
}

impl SimilarIonGrouper {
    pub fn new(options: &SicPipelineOptions) -> Self {
        Self {
            options: options.similarity.clone(),
            sic_tolerance: options.sic.tolerance(),
            limit_search_to_custom_mzs: options.sic.limit_search_to_custom_mzs,
            comparer: FragSpectrumComparer::new(&options.binning, &options.reporter_ions),
            abort: AbortFlag::default(),
        }
    }

    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn comparer(&self) -> &FragSpectrumComparer {
        &self.comparer
    }

    fn is_eligible(&self, parent_ion: &ParentIon) -> bool {
        parent_ion.uses_standard_sic() && (!self.limit_search_to_custom_mzs || parent_ion.custom_sic_peak)
    }

    /// The m/z offsets from a cluster's average at which related ions are searched for
    fn search_offsets(&self, mz: f64) -> Vec<f64> {
        let mut offsets = vec![0.0, 1.0, -1.0, 0.5, -0.5];
        if tolerance_half_width_da(self.sic_tolerance, mz) <= THIRDS_MAXIMUM_SIC_TOLERANCE_DA
            && self.options.similar_ion_mz_tolerance_half_width <= THIRDS_MAXIMUM_HALF_WIDTH
        {
            offsets.extend([1.0 / 3.0, -1.0 / 3.0, 2.0 / 3.0, -2.0 / 3.0]);
        }
        offsets
    }

    /// Cluster the parent ions of `scan_list` and point every clustered ion at the apex of
    /// its cluster's most intense member.
    ///
    /// Returns every cluster, singletons included. Running this again on the same scan
    /// list produces the same clusters.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn find_similar_parent_ions<S: SpectrumSource + ?Sized>(
        &self,
        scan_list: &mut ScanList,
        spectra: &mut S,
        progress: &mut ProgressRecord,
    ) -> Result<Vec<UniqueMzListItem>, SimilarityError> {
        let mut eligible: Vec<usize> = scan_list
            .parent_ions
            .iter()
            .enumerate()
            .filter(|(_, ion)| self.is_eligible(ion))
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        let mut lookup = SearchRange::new();
        lookup.load_entries(
            eligible
                .iter()
                .map(|i| SearchEntry::new(round_mz(scan_list.parent_ions[*i].mz), *i))
                .collect(),
        );

        let intensity_of = |i: usize| scan_list.parent_ions[i].sic_stats.peak.max_intensity_value;
        eligible.sort_by(|a, b| intensity_of(*b).total_cmp(&intensity_of(*a)).then(a.cmp(b)));

        let mut used = vec![false; scan_list.parent_ions.len()];
        let mut clusters = Vec::new();
        for (n, seed) in eligible.iter().copied().enumerate() {
            if n % ABORT_POLL_INTERVAL == 0 && self.abort.is_aborted() {
                info!("Similar parent ion grouping was cancelled after {n} seeds");
                scan_list.processing_incomplete = true;
                break;
            }
            if used[seed] {
                continue;
            }
            used[seed] = true;
            let cluster = self.grow_cluster(scan_list, seed, &lookup, &mut used, spectra)?;
            clusters.push(cluster);
        }

        let mut grouped = 0;
        for cluster in clusters.iter() {
            let leader = cluster.max_intensity_parent_ion_index;
            let apex_scan = scan_list.parent_ions[leader].optimal_peak_apex_scan_number;
            for member in cluster.parent_ion_indices.iter().copied() {
                let ion = &mut scan_list.parent_ions[member];
                if member == leader || cluster.match_count == 1 {
                    ion.peak_apex_override_parent_ion_index = None;
                } else {
                    ion.optimal_peak_apex_scan_number = apex_scan;
                    ion.peak_apex_override_parent_ion_index = Some(leader);
                    grouped += 1;
                }
            }
        }
        let multi = clusters.iter().filter(|c| c.match_count > 1).count();
        progress.similarity_clusters += multi;
        progress.parent_ions_grouped += grouped;
        debug!(
            "Grouped {grouped} parent ions into {multi} clusters out of {} eligible",
            eligible.len()
        );
        Ok(clusters)
    }

    fn grow_cluster<S: SpectrumSource + ?Sized>(
        &self,
        scan_list: &ScanList,
        seed: usize,
        lookup: &SearchRange,
        used: &mut [bool],
        spectra: &mut S,
    ) -> Result<UniqueMzListItem, SimilarityError> {
        let mut cluster = UniqueMzListItem::seeded(seed, &scan_list.parent_ions[seed]);
        let half_width = self.options.similar_ion_mz_tolerance_half_width;
        let mut leader = seed;
        let mut leader_spectra: Option<Vec<BinnedSpectrum>> = None;

        loop {
            let mut added = false;
            for offset in self.search_offsets(cluster.mz_avg) {
                let target = round_mz(cluster.mz_avg + offset);
                for candidate in lookup.find_original_indices(target, half_width) {
                    if used[candidate] {
                        continue;
                    }
                    if cluster.max_intensity_parent_ion_index != leader {
                        leader = cluster.max_intensity_parent_ion_index;
                        leader_spectra = None;
                    }
                    let leader_ion = &scan_list.parent_ions[leader];
                    let candidate_ion = &scan_list.parent_ions[candidate];
                    let dt = elution_time_difference(
                        peak_apex(scan_list, leader_ion),
                        peak_apex(scan_list, candidate_ion),
                    );
                    if dt > self.options.similar_ion_tolerance_half_width_minutes {
                        continue;
                    }
                    if FragSpectrumComparer::is_comparable(leader_ion)
                        && FragSpectrumComparer::is_comparable(candidate_ion)
                    {
                        if leader_spectra.is_none() {
                            leader_spectra =
                                Some(self.comparer.bin_parent_ion_spectra(scan_list, leader, spectra)?);
                        }
                        let candidate_spectra =
                            self.comparer.bin_parent_ion_spectra(scan_list, candidate, spectra)?;
                        let score = leader_spectra
                            .as_deref()
                            .map(|l| self.comparer.best_correlation(l, &candidate_spectra))
                            .unwrap_or_default();
                        if score <= self.options.spectrum_similarity_minimum {
                            continue;
                        }
                    }
                    used[candidate] = true;
                    cluster.merge(candidate, candidate_ion, offset);
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
        Ok(cluster)
    }
}
