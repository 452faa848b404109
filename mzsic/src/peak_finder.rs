//! Noise estimation and peak detection over selected ion chromatograms.
//!
//! [`PeakFinder`] is the contract the SIC builder and the MRM processor depend on.
//! [`BasicPeakFinder`] implements it with a trimmed-median baseline, moving-average
//! smoothing and local-maximum detection.
use std::cmp::Ordering;

use tracing::warn;

use crate::error::PeakFinderError;
use crate::options::PeakFinderOptions;
use crate::parent_ion::{BaselineNoiseStats, SicPeak, SicPotentialAreaStats};
use crate::sic::details::SicDetails;

/// The baseline noise of one contiguous stretch of a trace, bounds inclusive
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NoiseSegment {
    pub start: usize,
    pub end: usize,
    pub stats: BaselineNoiseStats,
}

/// The outcome of [`PeakFinder::find_peak_and_area`]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PeakSearchResult {
    pub found: bool,
    pub area_stats_for_peak: SicPotentialAreaStats,
    /// The smoothed intensities of the searched SIC
    pub smoothed: Vec<f64>,
}

pub trait PeakFinder {
    /// Estimate the baseline noise over `trace[start..=end]`
    fn compute_noise_level(
        &self,
        trace: &[f64],
        start: usize,
        end: usize,
    ) -> Result<Vec<NoiseSegment>, PeakFinderError>;

    /// Estimate the smallest plausible peak area in `trace`
    fn find_potential_peak_area(&self, trace: &[f64]) -> SicPotentialAreaStats;

    /// Search `sic` for a peak, updating `peak` in place.
    ///
    /// `peak.index_observed` and `peak.baseline_noise_stats` must be set by the caller.
    /// With `prefer_largest` the largest peak is chosen, otherwise the one nearest
    /// `peak.index_observed`.
    fn find_peak_and_area(
        &self,
        sic: &SicDetails,
        peak: &mut SicPeak,
        area_stats_in_full_trace: &SicPotentialAreaStats,
        prefer_largest: bool,
        sim_data_present: bool,
    ) -> PeakSearchResult;

    /// The intensity of the SIC at the time of fragmentation scan `frag_scan_number`
    fn compute_parent_ion_intensity(
        &self,
        sic: &SicDetails,
        peak: &SicPeak,
        frag_scan_number: i32,
    ) -> f64;

    fn lookup_noise_stats_for_segment(
        &self,
        index: usize,
        segments: &[NoiseSegment],
    ) -> BaselineNoiseStats {
        lookup_noise_stats_for_segment(index, segments)
    }
}

/// The noise statistics of the segment containing `index`, or of the nearest segment
pub fn lookup_noise_stats_for_segment(index: usize, segments: &[NoiseSegment]) -> BaselineNoiseStats {
    segments
        .iter()
        .min_by_key(|s| {
            if index < s.start {
                s.start - index
            } else if index > s.end {
                index - s.end
            } else {
                0
            }
        })
        .map(|s| s.stats)
        .unwrap_or_default()
}

/// The median of `values`, which must be sorted. An empty slice yields zero.
pub fn median(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        warn!("Median requested for an empty list, using 0");
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// A centred moving average. The window is clamped to an odd width no larger than the data.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    if window <= 1 {
        return values.to_vec();
    }
    let half = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(n - 1);
            values[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    apex: usize,
    left: usize,
    right: usize,
    area: f64,
}

#[derive(Debug, Default, Clone)]
pub struct BasicPeakFinder {
    pub options: PeakFinderOptions,
}

impl BasicPeakFinder {
    pub fn new(options: PeakFinderOptions) -> Self {
        Self { options }
    }

    fn segment_stats(&self, values: &[f64]) -> BaselineNoiseStats {
        let mut positive: Vec<f64> = values.iter().copied().filter(|v| *v > 0.0).collect();
        positive.sort_by(|a, b| a.total_cmp(b));
        let keep = ((positive.len() as f64) * self.options.trimmed_mean_fraction_low_intensity)
            .round() as usize;
        let keep = keep.clamp(positive.len().min(1), positive.len());
        let low = &positive[..keep];
        let level = median(low);
        let std_dev = if low.len() > 1 {
            let mean = low.iter().sum::<f64>() / low.len() as f64;
            (low.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (low.len() - 1) as f64).sqrt()
        } else {
            0.0
        };
        BaselineNoiseStats {
            noise_level: level.max(self.options.minimum_noise_level),
            noise_std_dev: std_dev,
            point_count: low.len(),
        }
    }

    fn trapezoid_area(sic: &SicDetails, left: usize, right: usize) -> f64 {
        if left == right {
            return sic.points[left].intensity;
        }
        sic.points[left..=right]
            .windows(2)
            .map(|w| {
                let dx = (w[1].scan_number - w[0].scan_number).max(1) as f64;
                dx * (w[0].intensity + w[1].intensity) / 2.0
            })
            .sum()
    }

    fn fwhm(sic: &SicDetails, apex: usize) -> i32 {
        let points = &sic.points;
        let half = points[apex].intensity / 2.0;
        let interpolate = |inner: usize, outer: usize| -> f64 {
            let (a, b) = (&points[inner], &points[outer]);
            let drop = a.intensity - b.intensity;
            if drop <= 0.0 {
                return a.scan_number as f64;
            }
            let frac = ((a.intensity - half) / drop).clamp(0.0, 1.0);
            a.scan_number as f64 + frac * (b.scan_number - a.scan_number) as f64
        };
        let mut i = apex;
        while i > 0 && points[i - 1].intensity >= half {
            i -= 1;
        }
        let left_x = if i > 0 {
            interpolate(i, i - 1)
        } else {
            points[0].scan_number as f64
        };
        let mut j = apex;
        while j + 1 < points.len() && points[j + 1].intensity >= half {
            j += 1;
        }
        let right_x = if j + 1 < points.len() {
            interpolate(j, j + 1)
        } else {
            points[j].scan_number as f64
        };
        (right_x - left_x).round().max(0.0) as i32
    }

    fn candidates(&self, raw: &[f64], smoothed: &[f64], noise_level: f64) -> Vec<Candidate> {
        let n = raw.len();
        let basis = if self.options.use_smoothed_data_for_apex {
            smoothed
        } else {
            raw
        };
        let half_window = self.options.smoothing_window / 2;
        let mut found: Vec<Candidate> = Vec::new();
        for i in 0..n {
            let left_ok = i == 0 || basis[i] >= basis[i - 1];
            let right_ok = i + 1 == n || basis[i] > basis[i + 1];
            if !(left_ok && right_ok) || basis[i] <= 0.0 {
                continue;
            }
            // The apex is the most intense raw point near the smoothed maximum
            let lo = i.saturating_sub(half_window);
            let hi = (i + half_window).min(n - 1);
            let mut apex = i;
            for k in lo..=hi {
                if raw[k] > raw[apex] {
                    apex = k;
                }
            }
            if found.iter().any(|c| c.apex == apex) {
                continue;
            }
            let threshold = noise_level.max(raw[apex] * self.options.boundary_fraction_of_apex);
            let mut left = apex;
            while left > 0 && raw[left] > threshold && raw[left - 1] <= raw[left] {
                left -= 1;
            }
            let mut right = apex;
            while right + 1 < n && raw[right] > threshold && raw[right + 1] <= raw[right] {
                right += 1;
            }
            found.push(Candidate {
                apex,
                left,
                right,
                area: 0.0,
            });
        }
        found
    }
}

impl PeakFinder for BasicPeakFinder {
    fn compute_noise_level(
        &self,
        trace: &[f64],
        start: usize,
        end: usize,
    ) -> Result<Vec<NoiseSegment>, PeakFinderError> {
        if trace.is_empty() {
            return Err(PeakFinderError::EmptyTrace);
        }
        if start > end || end >= trace.len() {
            return Err(PeakFinderError::InvalidRange {
                start,
                end,
                length: trace.len(),
            });
        }
        let span = end - start + 1;
        let segment_length = match self.options.noise_segment_length {
            0 => span,
            n => n.min(span),
        };
        let mut segments = Vec::with_capacity(span / segment_length + 1);
        let mut seg_start = start;
        while seg_start <= end {
            let mut seg_end = (seg_start + segment_length - 1).min(end);
            // Fold a short tail into the previous segment
            if end - seg_end < segment_length / 2 {
                seg_end = end;
            }
            segments.push(NoiseSegment {
                start: seg_start,
                end: seg_end,
                stats: self.segment_stats(&trace[seg_start..=seg_end]),
            });
            seg_start = seg_end + 1;
        }
        Ok(segments)
    }

    fn find_potential_peak_area(&self, trace: &[f64]) -> SicPotentialAreaStats {
        let mut positive: Vec<f64> = trace.iter().copied().filter(|v| *v > 0.0).collect();
        positive.sort_by(|a, b| a.total_cmp(b));
        let take = self.options.potential_area_point_count.min(positive.len());
        SicPotentialAreaStats {
            min_potential_peak_area: positive[..take].iter().sum(),
            peak_count_basis_for_min_potential_area: take,
        }
    }

    fn find_peak_and_area(
        &self,
        sic: &SicDetails,
        peak: &mut SicPeak,
        area_stats_in_full_trace: &SicPotentialAreaStats,
        prefer_largest: bool,
        sim_data_present: bool,
    ) -> PeakSearchResult {
        let raw = sic.intensities();
        if raw.is_empty() {
            return PeakSearchResult {
                area_stats_for_peak: *area_stats_in_full_trace,
                ..Default::default()
            };
        }
        let smoothed = if sim_data_present {
            raw.clone()
        } else {
            moving_average(&raw, self.options.smoothing_window)
        };
        let noise_level = peak.baseline_noise_stats.noise_level;
        let mut candidates = self.candidates(&raw, &smoothed, noise_level);
        if candidates.is_empty() {
            return PeakSearchResult {
                area_stats_for_peak: *area_stats_in_full_trace,
                smoothed,
                ..Default::default()
            };
        }
        for c in candidates.iter_mut() {
            c.area = Self::trapezoid_area(sic, c.left, c.right);
        }

        let signal_to_noise = |apex: usize| {
            if noise_level > 0.0 {
                raw[apex] / noise_level
            } else {
                raw[apex]
            }
        };
        let passing: Vec<Candidate> = candidates
            .iter()
            .copied()
            .filter(|c| signal_to_noise(c.apex) >= self.options.minimum_signal_to_noise_ratio)
            .collect();
        if passing.is_empty() {
            return PeakSearchResult {
                area_stats_for_peak: *area_stats_in_full_trace,
                smoothed,
                ..Default::default()
            };
        }
        let pool = &passing;

        let observed = peak.index_observed.min(raw.len() - 1);
        let chosen = if prefer_largest {
            pool.iter()
                .max_by(|a, b| a.area.partial_cmp(&b.area).unwrap_or(Ordering::Equal))
        } else {
            pool.iter().min_by_key(|c| {
                let contains = c.left <= observed && observed <= c.right;
                (!contains, c.apex.abs_diff(observed))
            })
        };
        let chosen = match chosen {
            Some(c) => *c,
            None => return PeakSearchResult::default(),
        };

        peak.index_max = chosen.apex;
        peak.index_base_left = chosen.left;
        peak.index_base_right = chosen.right;
        peak.max_intensity_value = raw[chosen.apex];
        peak.area = chosen.area;
        peak.signal_to_noise_ratio = signal_to_noise(chosen.apex);
        peak.fwhm_scans = Self::fwhm(sic, chosen.apex);

        let mut area_stats_for_peak = self.find_potential_peak_area(&raw[chosen.left..=chosen.right]);
        if area_stats_for_peak.min_potential_peak_area
            > area_stats_in_full_trace.min_potential_peak_area
            && area_stats_in_full_trace.peak_count_basis_for_min_potential_area > 0
        {
            area_stats_for_peak = *area_stats_in_full_trace;
        }

        PeakSearchResult {
            found: true,
            area_stats_for_peak,
            smoothed,
        }
    }

    fn compute_parent_ion_intensity(
        &self,
        sic: &SicDetails,
        _peak: &SicPeak,
        frag_scan_number: i32,
    ) -> f64 {
        let points = &sic.points;
        if points.is_empty() {
            return 0.0;
        }
        let right_of = points.partition_point(|p| p.scan_number <= frag_scan_number);
        if right_of == 0 {
            return points[0].intensity;
        }
        let before = &points[right_of - 1];
        if before.scan_number == frag_scan_number || right_of == points.len() {
            return before.intensity;
        }
        let after = &points[right_of];
        let span = (after.scan_number - before.scan_number) as f64;
        let frac = (frag_scan_number - before.scan_number) as f64 / span;
        before.intensity + frac * (after.intensity - before.intensity)
    }
}
