//! A minimal centroided mass spectrum with parallel m/z and intensity arrays
use std::cmp::Ordering;

use itertools::Itertools;

use crate::search_range::find_value_range;

/// How the intensities of the ions falling inside an m/z window are combined
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IonAggregation {
    /// Sum the intensity of every ion in the window
    #[default]
    Sum,
    /// Keep the intensity of the most intense ion in the window
    Max,
}

/// The result of combining the ions inside an m/z window
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct IonAggregate {
    /// The aggregated intensity
    pub intensity: f64,
    /// The m/z of the ion nearest to the window's center
    pub closest_mz: f64,
    /// The number of ions inside the window
    pub ion_count: usize,
}

/// One mass spectrum: a scan number and equal-length, m/z-ascending arrays.
///
/// Instances are meant to be refilled in place with [`Spectrum::copy_from`] and
/// [`Spectrum::clear`] so their buffers can be reused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub scan_number: i32,
    pub mzs: Vec<f64>,
    pub intensities: Vec<f64>,
    /// The ion count before any filtering was applied, when it differs
    pub raw_ion_count: Option<usize>,
}

impl Spectrum {
    pub fn new(scan_number: i32, mzs: Vec<f64>, intensities: Vec<f64>) -> Self {
        assert_eq!(
            mzs.len(),
            intensities.len(),
            "m/z and intensity arrays must be the same length"
        );
        let mut this = Self {
            scan_number,
            mzs,
            intensities,
            raw_ion_count: None,
        };
        this.sort_by_mz();
        this
    }

    pub fn from_pairs(scan_number: i32, pairs: &[(f64, f64)]) -> Self {
        let (mzs, intensities) = pairs.iter().copied().unzip();
        Self::new(scan_number, mzs, intensities)
    }

    pub fn ion_count(&self) -> usize {
        self.mzs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mzs.is_empty()
    }

    /// Empty the spectrum, keeping its allocations
    pub fn clear(&mut self) {
        self.scan_number = 0;
        self.mzs.clear();
        self.intensities.clear();
        self.raw_ion_count = None;
    }

    /// Overwrite this spectrum's contents with `other`'s, reusing buffers
    pub fn copy_from(&mut self, other: &Spectrum) {
        self.scan_number = other.scan_number;
        self.mzs.clear();
        self.mzs.extend_from_slice(&other.mzs);
        self.intensities.clear();
        self.intensities.extend_from_slice(&other.intensities);
        self.raw_ion_count = other.raw_ion_count;
    }

    pub fn push(&mut self, mz: f64, intensity: f64) {
        self.mzs.push(mz);
        self.intensities.push(intensity);
    }

    pub fn is_sorted(&self) -> bool {
        self.mzs.iter().tuple_windows().all(|(a, b)| a <= b)
    }

    /// Restore ascending m/z order, carrying intensities along
    pub fn sort_by_mz(&mut self) {
        if self.is_sorted() {
            return;
        }
        let mut pairs: Vec<(f64, f64)> = self
            .mzs
            .iter()
            .copied()
            .zip(self.intensities.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.mzs.clear();
        self.intensities.clear();
        for (mz, inten) in pairs {
            self.push(mz, inten);
        }
    }

    pub fn tic(&self) -> f64 {
        self.intensities.iter().sum()
    }

    /// The most intense ion as `(mz, intensity)`
    pub fn base_peak(&self) -> Option<(f64, f64)> {
        self.mzs
            .iter()
            .zip(self.intensities.iter())
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
            .map(|(mz, i)| (*mz, *i))
    }

    /// The smallest strictly positive intensity, or `0.0` when there is none
    pub fn minimum_positive_intensity(&self) -> f64 {
        self.intensities
            .iter()
            .copied()
            .filter(|i| *i > 0.0)
            .fold(None, |acc: Option<f64>, i| match acc {
                Some(m) => Some(m.min(i)),
                None => Some(i),
            })
            .unwrap_or_default()
    }

    /// The index range of ions within `tolerance` Da of `mz`
    pub fn find_ions_in_range(&self, mz: f64, tolerance: f64) -> Option<(usize, usize)> {
        find_value_range(&self.mzs, mz, tolerance)
    }

    /// Combine the ions within `tolerance` Da of `mz`
    pub fn aggregate_ions_in_range(
        &self,
        mz: f64,
        tolerance: f64,
        aggregation: IonAggregation,
    ) -> IonAggregate {
        let (start, end) = match self.find_ions_in_range(mz, tolerance) {
            Some(bounds) => bounds,
            None => return IonAggregate::default(),
        };
        let mut acc = IonAggregate {
            intensity: 0.0,
            closest_mz: self.mzs[start],
            ion_count: end - start + 1,
        };
        for i in start..=end {
            let ion_mz = self.mzs[i];
            let inten = self.intensities[i];
            match aggregation {
                IonAggregation::Sum => acc.intensity += inten,
                IonAggregation::Max => acc.intensity = acc.intensity.max(inten),
            }
            if (ion_mz - mz).abs() < (acc.closest_mz - mz).abs() {
                acc.closest_mz = ion_mz;
            }
        }
        acc
    }

    /// The ion nearest `mz` within `tolerance` Da as `(mz, intensity)`
    pub fn closest_ion(&self, mz: f64, tolerance: f64) -> Option<(f64, f64)> {
        let (start, end) = self.find_ions_in_range(mz, tolerance)?;
        (start..=end)
            .min_by(|a, b| {
                (self.mzs[*a] - mz)
                    .abs()
                    .total_cmp(&(self.mzs[*b] - mz).abs())
            })
            .map(|i| (self.mzs[i], self.intensities[i]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.mzs.iter().copied().zip(self.intensities.iter().copied())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make() -> Spectrum {
        Spectrum::from_pairs(
            12,
            &[
                (500.02, 5.0),
                (499.99, 20.0),
                (500.0, 100.0),
                (600.0, 0.0),
                (750.5, 3.0),
            ],
        )
    }

    #[test]
    fn test_sorted_on_construction() {
        let s = make();
        assert!(s.is_sorted());
        assert_eq!(s.mzs[0], 499.99);
        assert_eq!(s.intensities[0], 20.0);
    }

    #[test]
    fn test_aggregate() {
        let s = make();
        let agg = s.aggregate_ions_in_range(500.0, 0.025, IonAggregation::Sum);
        assert_eq!(agg.ion_count, 3);
        assert_eq!(agg.intensity, 125.0);
        assert_eq!(agg.closest_mz, 500.0);

        let agg = s.aggregate_ions_in_range(500.0, 0.025, IonAggregation::Max);
        assert_eq!(agg.intensity, 100.0);

        let agg = s.aggregate_ions_in_range(400.0, 0.02, IonAggregation::Sum);
        assert_eq!(agg, IonAggregate::default());
    }

    #[test]
    fn test_summaries() {
        let s = make();
        assert_eq!(s.minimum_positive_intensity(), 3.0);
        assert_eq!(s.base_peak(), Some((500.0, 100.0)));
        assert_eq!(s.tic(), 128.0);
        assert_eq!(s.closest_ion(500.015, 0.05), Some((500.02, 5.0)));
        assert_eq!(Spectrum::default().minimum_positive_intensity(), 0.0);
    }

    #[test]
    fn test_copy_from_reuses() {
        let s = make();
        let mut t = Spectrum::from_pairs(1, &[(1.0, 1.0)]);
        t.copy_from(&s);
        assert_eq!(t, s);
        t.clear();
        assert!(t.is_empty());
        assert!(t.mzs.capacity() >= 5);
    }
}
