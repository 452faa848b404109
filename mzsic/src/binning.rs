//! Binning centroided spectra onto a fixed m/z grid so they can be correlated
use tracing::warn;

use crate::options::BinningOptions;
use crate::spectrum::Spectrum;

/// A fixed m/z grid: bin `i` covers `[start + i * size, start + (i + 1) * size)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinGrid {
    pub start: f64,
    pub end: f64,
    pub bin_size: f64,
    pub bin_count: usize,
}

impl BinGrid {
    /// The grid described by `options`, shifted right by `offset_fraction` of a bin.
    ///
    /// When the range would need more than `maximum_bin_count` bins the bin size is
    /// widened until it fits.
    pub fn new(options: &BinningOptions, offset_fraction: f64) -> Self {
        let mut bin_size = if options.bin_size > 0.0 {
            options.bin_size
        } else {
            warn!("Invalid bin size {}, using 1", options.bin_size);
            1.0
        };
        let span = (options.end_x - options.start_x).max(bin_size);
        let max_bins = options.maximum_bin_count.max(1);
        let mut bin_count = (span / bin_size).ceil() as usize;
        if bin_count > max_bins {
            bin_size = span / max_bins as f64;
            bin_count = max_bins;
            warn!("Binning {span} m/z would need too many bins, widening bins to {bin_size}");
        }
        let start = options.start_x + offset_fraction * bin_size;
        Self {
            start,
            end: start + bin_count as f64 * bin_size,
            bin_size,
            bin_count,
        }
    }

    pub fn bin_for(&self, mz: f64) -> Option<usize> {
        if mz < self.start || mz >= self.end {
            return None;
        }
        let i = ((mz - self.start) / self.bin_size) as usize;
        (i < self.bin_count).then_some(i)
    }
}

/// Bin `spectrum` onto `grid`, skipping ions inside any of the `exclusions` m/z windows.
///
/// Bins below `intensity_precision_percent` of the most intense bin are zeroed, and with
/// `normalize` the most intense bin is scaled to 100.
pub fn bin_spectrum(
    spectrum: &Spectrum,
    grid: &BinGrid,
    options: &BinningOptions,
    exclusions: &[(f64, f64)],
) -> Vec<f64> {
    let mut bins = vec![0.0; grid.bin_count];
    for (mz, intensity) in spectrum.iter() {
        if exclusions.iter().any(|(lo, hi)| *lo <= mz && mz <= *hi) {
            continue;
        }
        let Some(i) = grid.bin_for(mz) else {
            continue;
        };
        if options.sum_all_intensities_for_bin {
            bins[i] += intensity;
        } else {
            bins[i] = bins[i].max(intensity);
        }
    }

    let max = bins.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 {
        return bins;
    }
    let floor = max * options.intensity_precision_percent / 100.0;
    let scale = if options.normalize { 100.0 / max } else { 1.0 };
    for v in bins.iter_mut() {
        if *v < floor {
            *v = 0.0;
        } else {
            *v *= scale;
        }
    }
    bins
}

#[cfg(test)]
mod test {
    use super::*;

    fn options() -> BinningOptions {
        BinningOptions {
            start_x: 100.0,
            end_x: 110.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_grid() {
        let grid = BinGrid::new(&options(), 0.0);
        assert_eq!(grid.bin_count, 10);
        assert_eq!(grid.bin_for(100.0), Some(0));
        assert_eq!(grid.bin_for(109.99), Some(9));
        assert_eq!(grid.bin_for(110.0), None);
        assert_eq!(grid.bin_for(99.0), None);

        let shifted = BinGrid::new(&options(), 0.5);
        assert_eq!(shifted.bin_for(100.2), None);
        assert_eq!(shifted.bin_for(100.6), Some(0));

        let capped = BinGrid::new(
            &BinningOptions {
                maximum_bin_count: 5,
                ..options()
            },
            0.0,
        );
        assert_eq!(capped.bin_count, 5);
        assert_eq!(capped.bin_size, 2.0);
    }

    #[test]
    fn test_bin_spectrum() {
        let spectrum = Spectrum::from_pairs(
            1,
            &[(100.2, 10.0), (100.7, 5.0), (103.5, 1000.0), (104.1, 2.0), (108.0, 50.0)],
        );
        let grid = BinGrid::new(&options(), 0.0);
        let bins = bin_spectrum(&spectrum, &grid, &options(), &[]);
        assert_eq!(bins[0], 15.0);
        assert_eq!(bins[3], 1000.0);
        // Below 1% of the most intense bin
        assert_eq!(bins[4], 0.0);
        assert_eq!(bins[8], 50.0);

        let max_opts = BinningOptions {
            sum_all_intensities_for_bin: false,
            normalize: true,
            ..options()
        };
        let bins = bin_spectrum(&spectrum, &grid, &max_opts, &[(103.0, 104.0)]);
        assert_eq!(bins[3], 0.0);
        assert_eq!(bins[8], 100.0);
        assert_eq!(bins[0], 20.0);
    }
}
