//! SIC data points and the adaptive boundary search over a full-length trace
use serde::Serialize;

use crate::options::SicOptions;
use crate::scan::ScanType;

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct SicDataPoint {
    /// Index into the scan list named by [`SicDetails::scan_type`]
    pub scan_index: usize,
    pub scan_number: i32,
    pub scan_time: f64,
    pub intensity: f64,
    /// The m/z of the ion nearest the search m/z in this scan
    pub mass: f64,
}

/// An ordered stretch of a selected ion chromatogram
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SicDetails {
    pub scan_type: ScanType,
    pub points: Vec<SicDataPoint>,
}

impl SicDetails {
    pub fn new(scan_type: ScanType) -> Self {
        Self {
            scan_type,
            points: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn push(&mut self, point: SicDataPoint) {
        self.points.push(point);
    }

    pub fn intensities(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.intensity).collect()
    }

    pub fn get(&self, index: usize) -> Option<&SicDataPoint> {
        self.points.get(index)
    }
}

/// The limits on how far a peak's window may be extended around its apex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakWidthLimits {
    pub backward_minutes: f64,
    pub forward_minutes: f64,
    pub initial_peak_width_scans_maximum: usize,
    pub minimum_noise_scans_to_include: usize,
    pub absolute_minimum_intensity: f64,
    pub intensity_threshold_fraction_max: f64,
}

impl PeakWidthLimits {
    pub fn from_options(options: &SicOptions) -> Self {
        Self {
            backward_minutes: options.max_sic_peak_width_minutes_backward,
            forward_minutes: options.max_sic_peak_width_minutes_forward,
            initial_peak_width_scans_maximum: options.initial_peak_width_scans_maximum,
            minimum_noise_scans_to_include: options.minimum_noise_scans_to_include.max(1),
            absolute_minimum_intensity: options.absolute_minimum_intensity,
            intensity_threshold_fraction_max: options.intensity_threshold_fraction_max,
        }
    }

    /// Allow a custom SIC peak to extend at least as far as its own time tolerance
    pub fn widened_for_custom(mut self, time_tolerance: f64) -> Self {
        self.backward_minutes = self.backward_minutes.max(time_tolerance);
        self.forward_minutes = self.forward_minutes.max(time_tolerance);
        self
    }

    fn threshold(&self, max_intensity: f64, noise_level: f64) -> f64 {
        self.absolute_minimum_intensity
            .max(max_intensity * self.intensity_threshold_fraction_max)
            .max(noise_level)
    }
}

/// Choose the window `[start, end]` of a full trace to search for the peak nearest `observed`.
///
/// The window starts as the three points centred on `observed` and grows one point at a time
/// in each direction. A direction stops growing once `minimum_noise_scans_to_include`
/// consecutive points fall below the intensity threshold and the window already reaches
/// `initial_peak_width_scans_maximum` points past both `observed` and the largest point seen,
/// or once the next point is further from `observed` in time than that direction's width limit.
///
/// `intensities` and `times` must be the same length. The result always satisfies
/// `start <= observed <= end < intensities.len()` for a non-empty trace.
pub fn extract_sic_details_from_full_sic(
    intensities: &[f64],
    times: &[f64],
    observed: usize,
    noise_level: f64,
    limits: &PeakWidthLimits,
) -> (usize, usize) {
    debug_assert_eq!(intensities.len(), times.len());
    let n = intensities.len().min(times.len());
    if n == 0 {
        return (0, 0);
    }
    let observed = observed.min(n - 1);
    let mut start = observed.saturating_sub(1);
    let mut end = (observed + 1).min(n - 1);

    let mut max_pos = start;
    for i in start..=end {
        if intensities[i] > intensities[max_pos] {
            max_pos = i;
        }
    }
    let mut max_value = intensities[max_pos];
    let apex_time = times[observed];
    let floor = limits.initial_peak_width_scans_maximum;

    let mut noise_run = 0;
    while start > 0 {
        let next = start - 1;
        if apex_time - times[next] > limits.backward_minutes {
            break;
        }
        start = next;
        let value = intensities[start];
        if value > max_value {
            max_value = value;
            max_pos = start;
        }
        if value < limits.threshold(max_value, noise_level) {
            noise_run += 1;
        } else {
            noise_run = 0;
        }
        if noise_run >= limits.minimum_noise_scans_to_include
            && observed.min(max_pos) - start >= floor
        {
            break;
        }
    }

    noise_run = 0;
    while end + 1 < n {
        let next = end + 1;
        if times[next] - apex_time > limits.forward_minutes {
            break;
        }
        end = next;
        let value = intensities[end];
        if value > max_value {
            max_value = value;
            max_pos = end;
        }
        if value < limits.threshold(max_value, noise_level) {
            noise_run += 1;
        } else {
            noise_run = 0;
        }
        if noise_run >= limits.minimum_noise_scans_to_include
            && end - observed.max(max_pos) >= floor
        {
            break;
        }
    }

    (start, end)
}

#[cfg(test)]
mod test {
    use super::*;

    fn limits() -> PeakWidthLimits {
        PeakWidthLimits {
            backward_minutes: 3.0,
            forward_minutes: 3.0,
            initial_peak_width_scans_maximum: 4,
            minimum_noise_scans_to_include: 3,
            absolute_minimum_intensity: 0.0,
            intensity_threshold_fraction_max: 0.01,
        }
    }

    fn times(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * step).collect()
    }

    #[test]
    fn test_small_trace() {
        let (s, e) = extract_sic_details_from_full_sic(&[10.0, 100.0, 10.0], &times(3, 0.1), 1, 5.0, &limits());
        assert_eq!((s, e), (0, 2));
        let (s, e) = extract_sic_details_from_full_sic(&[7.0], &[0.0], 5, 5.0, &limits());
        assert_eq!((s, e), (0, 0));
        assert_eq!(extract_sic_details_from_full_sic(&[], &[], 0, 0.0, &limits()), (0, 0));
    }

    #[test]
    fn test_noise_run_stops_extension() {
        // A peak at 50 surrounded by a long baseline of zeros
        let mut trace = vec![0.0; 101];
        for (offset, v) in [(0, 1000.0), (1, 600.0), (2, 200.0)] {
            trace[50 + offset] = v;
            trace[50 - offset] = v;
        }
        let (s, e) = extract_sic_details_from_full_sic(&trace, &times(101, 0.01), 50, 1.0, &limits());
        // Stops after the floor of 4 scans is met and 3 noise scans have been seen
        assert_eq!((s, e), (50 - 5, 50 + 5));
    }

    #[test]
    fn test_time_cap_stops_flat_baseline() {
        // A baseline that never drops below the threshold only stops at the width cap
        let trace = vec![50.0; 200];
        let (s, e) = extract_sic_details_from_full_sic(&trace, &times(200, 0.125), 100, 1.0, &limits());
        assert_eq!((s, e), (76, 124));
    }

    #[test]
    fn test_custom_widening() {
        let trace = vec![50.0; 200];
        let wide = limits().widened_for_custom(5.0);
        let (s, e) = extract_sic_details_from_full_sic(&trace, &times(200, 0.125), 100, 1.0, &wide);
        assert_eq!((s, e), (60, 140));
    }

    #[test]
    fn test_bounds_are_ordered() {
        let trace: Vec<f64> = (0..40).map(|i| ((i * 37) % 11) as f64).collect();
        let t = times(40, 0.2);
        for observed in 0..45 {
            let (s, e) = extract_sic_details_from_full_sic(&trace, &t, observed, 3.0, &limits());
            assert!(s <= e);
            assert!(e < trace.len());
            assert!(s <= observed.min(39) && observed.min(39) <= e);
        }
    }
}
