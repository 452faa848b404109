//! Run-wide configuration, built once and passed by reference into each component
use std::path::PathBuf;

use mzpeaks::Tolerance;
use serde::{Deserialize, Serialize};

use crate::reporter::ReporterIonMassMode;
use crate::spectrum::IonAggregation;

/// The smallest number of spectra the in-memory pool may be configured to hold
pub const MINIMUM_SPECTRA_TO_RETAIN: usize = 100;

/// How many slots the pool grows by when it is full and disk caching is unavailable
pub const POOL_GROWTH_INCREMENT: usize = 500;

/// Express a half-width tolerance in Da around `mz`
pub fn tolerance_half_width_da(tolerance: Tolerance, mz: f64) -> f64 {
    match tolerance {
        Tolerance::Da(da) => da,
        Tolerance::PPM(ppm) => mz * ppm / 1e6,
    }
}

/// Which eviction strategy the in-memory spectrum pool uses
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Round-robin overwrite of the oldest slot
    #[default]
    Array,
    /// True least-recently-used eviction
    LeastRecentlyUsed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumCacheOptions {
    pub disk_caching_always_disabled: bool,
    /// Where page files are written. Defaults to the system temporary directory.
    pub folder_path: Option<PathBuf>,
    pub spectra_to_retain_in_memory: usize,
    pub eviction_policy: EvictionPolicy,
    /// Page files from any run older than this many hours are deleted on close
    pub stale_file_age_hours: f64,
}

impl Default for SpectrumCacheOptions {
    fn default() -> Self {
        Self {
            disk_caching_always_disabled: false,
            folder_path: None,
            spectra_to_retain_in_memory: 1000,
            eviction_policy: EvictionPolicy::default(),
            stale_file_age_hours: 12.0,
        }
    }
}

impl SpectrumCacheOptions {
    /// The pool capacity actually used, never below [`MINIMUM_SPECTRA_TO_RETAIN`]
    pub fn effective_capacity(&self) -> usize {
        self.spectra_to_retain_in_memory.max(MINIMUM_SPECTRA_TO_RETAIN)
    }

    pub fn cache_folder(&self) -> PathBuf {
        self.folder_path.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SicOptions {
    pub sic_tolerance: f64,
    pub sic_tolerance_is_ppm: bool,
    pub max_sic_peak_width_minutes_backward: f64,
    pub max_sic_peak_width_minutes_forward: f64,
    /// The minimum number of scans a peak spans before a run of noise may end its extension
    pub initial_peak_width_scans_maximum: usize,
    /// How many consecutive below-threshold scans end extension in one direction
    pub minimum_noise_scans_to_include: usize,
    pub absolute_minimum_intensity: f64,
    pub intensity_threshold_fraction_max: f64,
    pub replace_sic_zeroes_with_minimum_positive: bool,
    pub ion_aggregation: IonAggregation,
    /// Refine a new parent ion's m/z with the closest survey spectrum ion
    pub refine_reported_parent_ion_mz: bool,
    /// Only custom SIC parent ions take part in similarity grouping
    pub limit_search_to_custom_mzs: bool,
    /// The fixed tolerance used when matching MRM parent ions
    pub mrm_tolerance: f64,
    /// Upper bound on the working memory of one m/z chunk, in bytes
    pub chunk_memory_limit_bytes: usize,
}

impl Default for SicOptions {
    fn default() -> Self {
        Self {
            sic_tolerance: 10.0,
            sic_tolerance_is_ppm: true,
            max_sic_peak_width_minutes_backward: 3.0,
            max_sic_peak_width_minutes_forward: 3.0,
            initial_peak_width_scans_maximum: 30,
            minimum_noise_scans_to_include: 10,
            absolute_minimum_intensity: 0.0,
            intensity_threshold_fraction_max: 0.01,
            replace_sic_zeroes_with_minimum_positive: true,
            ion_aggregation: IonAggregation::Sum,
            refine_reported_parent_ion_mz: false,
            limit_search_to_custom_mzs: false,
            mrm_tolerance: 0.01,
            chunk_memory_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

impl SicOptions {
    pub fn tolerance(&self) -> Tolerance {
        if self.sic_tolerance_is_ppm {
            Tolerance::PPM(self.sic_tolerance)
        } else {
            Tolerance::Da(self.sic_tolerance)
        }
    }

    pub fn tolerance_da(&self, mz: f64) -> f64 {
        tolerance_half_width_da(self.tolerance(), mz)
    }

    /// The tight tolerance for MRM transitions, in the same units as the SIC tolerance
    pub fn mrm_tolerance(&self) -> Tolerance {
        if self.sic_tolerance_is_ppm {
            Tolerance::PPM(self.mrm_tolerance)
        } else {
            Tolerance::Da(self.mrm_tolerance)
        }
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        match tolerance {
            Tolerance::PPM(v) => {
                self.sic_tolerance = v;
                self.sic_tolerance_is_ppm = true;
            }
            Tolerance::Da(v) => {
                self.sic_tolerance = v;
                self.sic_tolerance_is_ppm = false;
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityOptions {
    pub similar_ion_mz_tolerance_half_width: f64,
    pub similar_ion_tolerance_half_width_minutes: f64,
    pub spectrum_similarity_minimum: f64,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            similar_ion_mz_tolerance_half_width: 0.1,
            similar_ion_tolerance_half_width_minutes: 5.0,
            spectrum_similarity_minimum: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningOptions {
    pub start_x: f64,
    pub end_x: f64,
    pub bin_size: f64,
    pub intensity_precision_percent: f64,
    pub normalize: bool,
    pub sum_all_intensities_for_bin: bool,
    pub maximum_bin_count: usize,
}

impl Default for BinningOptions {
    fn default() -> Self {
        Self {
            start_x: 50.0,
            end_x: 2000.0,
            bin_size: 1.0,
            intensity_precision_percent: 1.0,
            normalize: false,
            sum_all_intensities_for_bin: true,
            maximum_bin_count: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakFinderOptions {
    /// Fraction of the trace's points, lowest first, used to estimate the baseline noise
    pub trimmed_mean_fraction_low_intensity: f64,
    /// Points per noise segment. `0` computes a single segment over the whole trace.
    pub noise_segment_length: usize,
    pub minimum_signal_to_noise_ratio: f64,
    pub minimum_noise_level: f64,
    /// The number of lowest positive points summed to estimate the minimum potential area
    pub potential_area_point_count: usize,
    pub smoothing_window: usize,
    pub use_smoothed_data_for_apex: bool,
    /// A peak's boundary stops descending once intensity falls below this fraction of the apex
    pub boundary_fraction_of_apex: f64,
}

impl Default for PeakFinderOptions {
    fn default() -> Self {
        Self {
            trimmed_mean_fraction_low_intensity: 0.75,
            noise_segment_length: 0,
            minimum_signal_to_noise_ratio: 3.0,
            minimum_noise_level: 1.0,
            potential_area_point_count: 5,
            smoothing_window: 3,
            use_smoothed_data_for_apex: true,
            boundary_fraction_of_apex: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterIonOptions {
    pub enabled: bool,
    pub mass_mode: ReporterIonMassMode,
    pub tolerance_da: f64,
    /// Take the largest ion in the window instead of summing the window
    pub use_max_abundance_in_window: bool,
    pub apply_isotope_correction: bool,
}

impl Default for ReporterIonOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            mass_mode: ReporterIonMassMode::default(),
            tolerance_da: 0.003,
            use_max_abundance_in_window: true,
            apply_isotope_correction: true,
        }
    }
}

/// Every option the SIC pipeline consumes
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SicPipelineOptions {
    pub sic: SicOptions,
    pub cache: SpectrumCacheOptions,
    pub similarity: SimilarityOptions,
    pub binning: BinningOptions,
    pub peak_finder: PeakFinderOptions,
    pub reporter_ions: ReporterIonOptions,
    pub skip_similarity_grouping: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SicPipelineOptions::default();
        assert_eq!(opts.sic.tolerance(), Tolerance::PPM(10.0));
        assert!((opts.sic.tolerance_da(500.0) - 0.005).abs() < 1e-12);
        assert_eq!(opts.cache.effective_capacity(), 1000);

        let cache = SpectrumCacheOptions {
            spectra_to_retain_in_memory: 5,
            ..Default::default()
        };
        assert_eq!(cache.effective_capacity(), MINIMUM_SPECTRA_TO_RETAIN);
    }

    #[test]
    fn test_with_tolerance() {
        let opts = SicOptions::default().with_tolerance(Tolerance::Da(0.01));
        assert!(!opts.sic_tolerance_is_ppm);
        assert_eq!(opts.tolerance_da(1234.0), 0.01);
    }
}
