//! Grouping parent ion m/z values into shared search windows and memory-bounded chunks
use mzpeaks::Tolerance;
use tracing::trace;

use crate::options::{tolerance_half_width_da, SicOptions};
use crate::parent_ion::ParentIon;
use crate::spectrum::Spectrum;

/// The bytes one point of a full SIC occupies across the chunk working arrays
pub const BYTES_PER_SIC_POINT: usize = 12;

/// A parent ion's target m/z and the tolerance to search it with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MzBinInfo {
    pub mz: f64,
    pub tolerance: f64,
    pub tolerance_is_ppm: bool,
    pub parent_ion_index: usize,
}

impl MzBinInfo {
    pub fn tolerance(&self) -> Tolerance {
        if self.tolerance_is_ppm {
            Tolerance::PPM(self.tolerance)
        } else {
            Tolerance::Da(self.tolerance)
        }
    }

    fn same_tolerance(&self, other: &MzBinInfo) -> bool {
        self.tolerance_is_ppm == other.tolerance_is_ppm && self.tolerance == other.tolerance
    }
}

/// A run of m/z-adjacent bins searched with one shared window centred on `search_mz`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MzSearchGroup {
    /// First bin of the group, inclusive
    pub mz_index_start: usize,
    /// Last bin of the group, inclusive
    pub mz_index_end: usize,
    pub search_mz: f64,
    pub tolerance: f64,
    pub tolerance_is_ppm: bool,
}

impl MzSearchGroup {
    pub fn member_count(&self) -> usize {
        self.mz_index_end - self.mz_index_start + 1
    }

    pub fn tolerance_da(&self) -> f64 {
        let tol = if self.tolerance_is_ppm {
            Tolerance::PPM(self.tolerance)
        } else {
            Tolerance::Da(self.tolerance)
        };
        tolerance_half_width_da(tol, self.search_mz)
    }
}

/// The bins of the parent ions eligible for the shared survey scan SIC pass whose
/// survey scans belong to the SIM window `sim_index` (or to none), sorted by m/z.
///
/// `survey_sim_index(i)` reports the SIM index of survey scan `i`.
pub fn create_mz_lookup_list<F: Fn(usize) -> Option<i32>>(
    parent_ions: &[ParentIon],
    options: &SicOptions,
    sim_index: Option<i32>,
    survey_sim_index: F,
) -> Vec<MzBinInfo> {
    let mut bins: Vec<MzBinInfo> = parent_ions
        .iter()
        .enumerate()
        .filter(|(_, ion)| ion.uses_standard_sic())
        .filter(|(_, ion)| survey_sim_index(ion.survey_scan_index) == sim_index)
        .map(|(i, ion)| {
            if ion.custom_sic_peak && ion.custom_sic_peak_mz_tolerance > 0.0 {
                MzBinInfo {
                    mz: ion.mz,
                    tolerance: ion.custom_sic_peak_mz_tolerance,
                    tolerance_is_ppm: false,
                    parent_ion_index: i,
                }
            } else {
                MzBinInfo {
                    mz: ion.mz,
                    tolerance: options.sic_tolerance,
                    tolerance_is_ppm: options.sic_tolerance_is_ppm,
                    parent_ion_index: i,
                }
            }
        })
        .collect();
    bins.sort_by(|a, b| a.mz.total_cmp(&b.mz).then(a.parent_ion_index.cmp(&b.parent_ion_index)));
    bins
}

/// The search m/z of a group: its middle element, or the mean of the two middle
/// elements when the group has an even number of members
pub fn group_search_mz(bins: &[MzBinInfo]) -> f64 {
    let n = bins.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        bins[n / 2].mz
    } else {
        (bins[n / 2 - 1].mz + bins[n / 2].mz) / 2.0
    }
}

/// Walk sorted `bins`, starting a new group whenever the next m/z lies more than half
/// the tolerance from the group's first m/z or uses a different tolerance
pub fn group_mz_bins(bins: &[MzBinInfo]) -> Vec<MzSearchGroup> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < bins.len() {
        let first = &bins[start];
        let half_window = tolerance_half_width_da(first.tolerance(), first.mz) / 2.0;
        let mut end = start;
        while end + 1 < bins.len() {
            let next = &bins[end + 1];
            if next.mz - first.mz <= half_window && next.same_tolerance(first) {
                end += 1;
            } else {
                break;
            }
        }
        groups.push(MzSearchGroup {
            mz_index_start: start,
            mz_index_end: end,
            search_mz: group_search_mz(&bins[start..=end]),
            tolerance: first.tolerance,
            tolerance_is_ppm: first.tolerance_is_ppm,
        });
        start = end + 1;
    }
    groups
}

/// How many groups fit in one chunk for a trace of `scan_count` points
pub fn max_groups_per_chunk(scan_count: usize, memory_limit_bytes: usize) -> usize {
    let per_group = scan_count.max(1) * BYTES_PER_SIC_POINT;
    (memory_limit_bytes / per_group).max(1)
}

/// The working arrays for one chunk of groups: for each group, its full trace over the
/// chunk's scans and the m/z of the ion matched in each scan
#[derive(Debug, Default, Clone)]
pub struct MzSearchChunk {
    pub groups: Vec<MzSearchGroup>,
    pub intensities: Vec<Vec<f64>>,
    pub masses: Vec<Vec<f64>>,
}

impl MzSearchChunk {
    pub fn new(groups: Vec<MzSearchGroup>, scan_count: usize) -> Self {
        let intensities = groups.iter().map(|_| Vec::with_capacity(scan_count)).collect();
        let masses = groups.iter().map(|_| Vec::with_capacity(scan_count)).collect();
        Self {
            groups,
            intensities,
            masses,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Append one scan's worth of points to every group's trace.
    ///
    /// Zero intensities are replaced with `minimum_positive_intensity` when the options
    /// ask for it.
    pub fn accumulate_scan(
        &mut self,
        spectrum: &Spectrum,
        options: &SicOptions,
        minimum_positive_intensity: f64,
    ) {
        for (g, group) in self.groups.iter().enumerate() {
            let agg = spectrum.aggregate_ions_in_range(
                group.search_mz,
                group.tolerance_da(),
                options.ion_aggregation,
            );
            let mut intensity = agg.intensity;
            let mass = if agg.ion_count > 0 {
                agg.closest_mz
            } else {
                group.search_mz
            };
            if intensity <= 0.0 && options.replace_sic_zeroes_with_minimum_positive {
                intensity = minimum_positive_intensity;
            }
            self.intensities[g].push(intensity);
            self.masses[g].push(mass);
        }
        trace!(
            "Accumulated scan {} into {} groups",
            spectrum.scan_number,
            self.groups.len()
        );
    }
}
