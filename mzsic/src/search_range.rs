//! A sort-once, query-many search over a numeric array for all values
//! within a tolerance of a query point.
//!
//! [`SearchRange`] sorts the loaded values a single time, keeping each value
//! paired with the position it held in the caller's array, and then answers
//! "which values lie within `±tolerance` of `x`" queries by narrowing a binary
//! search window until it lands on a value inside the range and walking outward
//! from there.
use std::cmp::Ordering;

use num_traits::ToPrimitive;

/// A value paired with the index it held in the array it was loaded from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchEntry<T> {
    pub value: T,
    pub index: usize,
}

impl<T> SearchEntry<T> {
    pub fn new(value: T, index: usize) -> Self {
        Self { value, index }
    }
}

/// The storage held by a [`SearchRange`]. Exactly one payload type is retained
/// at a time.
#[derive(Debug, Clone, Default)]
pub enum SearchData {
    #[default]
    Empty,
    Int(Vec<SearchEntry<i32>>),
    Float(Vec<SearchEntry<f32>>),
    Double(Vec<SearchEntry<f64>>),
}

impl SearchData {
    pub fn len(&self) -> usize {
        match self {
            SearchData::Empty => 0,
            SearchData::Int(v) => v.len(),
            SearchData::Float(v) => v.len(),
            SearchData::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The numeric types a [`SearchRange`] can be loaded with
pub trait SearchValue: Copy + PartialOrd {
    fn wrap(entries: Vec<SearchEntry<Self>>) -> SearchData;
}

impl SearchValue for i32 {
    fn wrap(entries: Vec<SearchEntry<Self>>) -> SearchData {
        SearchData::Int(entries)
    }
}

impl SearchValue for f32 {
    fn wrap(entries: Vec<SearchEntry<Self>>) -> SearchData {
        SearchData::Float(entries)
    }
}

impl SearchValue for f64 {
    fn wrap(entries: Vec<SearchEntry<Self>>) -> SearchData {
        SearchData::Double(entries)
    }
}

/// Find the contiguous range of positions `[start, end]` in a sequence of length `n`,
/// sorted ascending under `key`, whose values satisfy `lower <= value <= upper`.
///
/// The search window is halved until its midpoint falls inside the bounds, then the
/// range is grown one element at a time in both directions from the midpoint.
pub fn binary_range_search<T, F>(n: usize, key: F, lower: T, upper: T) -> Option<(usize, usize)>
where
    T: PartialOrd + Copy,
    F: Fn(usize) -> T,
{
    let in_range = |v: T| v >= lower && v <= upper;

    if n == 0 {
        return None;
    }
    if n == 1 {
        return if in_range(key(0)) { Some((0, 0)) } else { None };
    }

    let mut start = 0usize;
    let mut end = n - 1;
    loop {
        if start == end {
            return if in_range(key(start)) {
                Some((start, start))
            } else {
                None
            };
        }
        // Adjacent bounds must be compared directly, the midpoint would always
        // equal `start` and never visit `end`.
        if end - start == 1 {
            return match (in_range(key(start)), in_range(key(end))) {
                (true, true) => Some((start, end)),
                (true, false) => Some((start, start)),
                (false, true) => Some((end, end)),
                (false, false) => None,
            };
        }

        let mid = (start + end) / 2;
        let value = key(mid);
        if value > upper {
            end = mid - 1;
        } else if value < lower {
            start = mid + 1;
        } else {
            let mut lo = mid;
            while lo > 0 && in_range(key(lo - 1)) {
                lo -= 1;
            }
            let mut hi = mid;
            while hi + 1 < n && in_range(key(hi + 1)) {
                hi += 1;
            }
            return Some((lo, hi));
        }
        if start > end {
            return None;
        }
    }
}

/// Find the range of indices in an ascending sorted slice whose values lie within
/// `tolerance` of `value`.
pub fn find_value_range(sorted: &[f64], value: f64, tolerance: f64) -> Option<(usize, usize)> {
    binary_range_search(
        sorted.len(),
        |i| sorted[i],
        value - tolerance,
        value + tolerance,
    )
}

/// Sorts a numeric array once and answers tolerance-window queries against it.
///
/// Loading a new array of a different type discards the previous one.
#[derive(Debug, Clone, Default)]
pub struct SearchRange {
    data: SearchData,
    retain_original_indices: bool,
}

impl SearchRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a new instance and load `values` into it
    pub fn from_values<T: SearchValue>(values: &[T], retain_original_indices: bool) -> Self {
        let mut this = Self::new();
        this.load(values, retain_original_indices);
        this
    }

    /// Copy and sort `values`. When `retain_original_indices` is set, [`SearchRange::original_index`]
    /// maps sorted positions back to positions in `values`.
    pub fn load<T: SearchValue>(&mut self, values: &[T], retain_original_indices: bool) {
        let mut entries: Vec<SearchEntry<T>> = values
            .iter()
            .enumerate()
            .map(|(i, v)| SearchEntry::new(*v, i))
            .collect();
        entries.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal));
        if !retain_original_indices {
            entries
                .iter_mut()
                .enumerate()
                .for_each(|(i, e)| e.index = i);
        }
        self.retain_original_indices = retain_original_indices;
        self.data = T::wrap(entries);
    }

    /// Load `(value, index)` pairs directly, treating `index` as the original position
    pub fn load_entries<T: SearchValue>(&mut self, mut entries: Vec<SearchEntry<T>>) {
        entries.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal));
        self.retain_original_indices = true;
        self.data = T::wrap(entries);
    }

    pub fn clear(&mut self) {
        self.data = SearchData::Empty;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &SearchData {
        &self.data
    }

    pub fn retains_original_indices(&self) -> bool {
        self.retain_original_indices
    }

    /// Map a position in the sorted order back to the position the value held when loaded.
    ///
    /// Without retained indices this is the identity.
    pub fn original_index(&self, sorted_index: usize) -> usize {
        match &self.data {
            SearchData::Empty => sorted_index,
            SearchData::Int(v) => v[sorted_index].index,
            SearchData::Float(v) => v[sorted_index].index,
            SearchData::Double(v) => v[sorted_index].index,
        }
    }

    /// The value at a sorted position, widened to `f64`
    pub fn value_at(&self, sorted_index: usize) -> Option<f64> {
        match &self.data {
            SearchData::Empty => None,
            SearchData::Int(v) => v.get(sorted_index).map(|e| e.value as f64),
            SearchData::Float(v) => v.get(sorted_index).map(|e| e.value as f64),
            SearchData::Double(v) => v.get(sorted_index).map(|e| e.value),
        }
    }

    /// Find the sorted-index range `[start, end]` of values within `tolerance` of `value`.
    ///
    /// The query is converted into the stored type's domain. Integer storage rounds
    /// both `value` and `tolerance` to the nearest integer.
    pub fn find_range<V: ToPrimitive>(&self, value: V, tolerance: V) -> Option<(usize, usize)> {
        let value = value.to_f64()?;
        let tolerance = tolerance.to_f64()?.abs();
        match &self.data {
            SearchData::Empty => None,
            SearchData::Int(v) => {
                let center = value.round() as i64;
                let width = tolerance.round() as i64;
                binary_range_search(
                    v.len(),
                    |i| v[i].value as i64,
                    center - width,
                    center + width,
                )
            }
            SearchData::Float(v) => {
                let center = value as f32;
                let width = tolerance as f32;
                binary_range_search(v.len(), |i| v[i].value, center - width, center + width)
            }
            SearchData::Double(v) => {
                binary_range_search(v.len(), |i| v[i].value, value - tolerance, value + tolerance)
            }
        }
    }

    /// As [`SearchRange::find_range`], but yield the original indices of the matches
    pub fn find_original_indices<V: ToPrimitive>(&self, value: V, tolerance: V) -> Vec<usize> {
        match self.find_range(value, tolerance) {
            Some((start, end)) => (start..=end).map(|i| self.original_index(i)).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn brute_force(values: &[f64], value: f64, tol: f64) -> Vec<f64> {
        let mut hits: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| *v >= value - tol && *v <= value + tol)
            .collect();
        hits.sort_by(|a, b| a.total_cmp(b));
        hits
    }

    fn from_range(search: &SearchRange, hit: Option<(usize, usize)>) -> Vec<f64> {
        match hit {
            Some((s, e)) => (s..=e).map(|i| search.value_at(i).unwrap()).collect(),
            None => Vec::new(),
        }
    }

    #[test]
    fn test_empty() {
        let search = SearchRange::new();
        assert!(search.find_range(5.0, 1.0).is_none());
        let search = SearchRange::from_values::<f64>(&[], true);
        assert!(search.is_empty());
        assert!(search.find_range(5.0, 100.0).is_none());
    }

    #[test]
    fn test_single_element() {
        let search = SearchRange::from_values(&[10.0f64], true);
        assert_eq!(search.find_range(10.4, 0.5), Some((0, 0)));
        assert_eq!(search.find_range(10.5, 0.5), Some((0, 0)));
        assert_eq!(search.find_range(10.6, 0.5), None);
        assert_eq!(search.find_range(9.0, 0.5), None);
    }

    #[test]
    fn test_adjacent_boundaries() {
        let search = SearchRange::from_values(&[1.0f64, 2.0], false);
        assert_eq!(search.find_range(1.0, 0.1), Some((0, 0)));
        assert_eq!(search.find_range(2.0, 0.1), Some((1, 1)));
        assert_eq!(search.find_range(1.5, 0.5), Some((0, 1)));
        assert_eq!(search.find_range(1.5, 0.2), None);

        // Narrowing down to an adjacent pair at the tail of a longer array
        let search = SearchRange::from_values(&[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], false);
        assert_eq!(search.find_range(5.9, 0.2), Some((5, 5)));
        assert_eq!(search.find_range(5.1, 0.2), Some((4, 4)));
        assert_eq!(search.find_range(0.5, 0.2), None);
        assert_eq!(search.find_range(6.5, 0.2), None);
    }

    #[test]
    fn test_against_brute_force() {
        let values: Vec<f64> = (0..257)
            .map(|i| ((i * 7919) % 1013) as f64 / 10.0)
            .collect();
        let search = SearchRange::from_values(&values, true);
        for q in 0..220 {
            let query = q as f64 * 0.47;
            for tol in [0.0, 0.05, 0.3, 1.0, 4.5] {
                let expected = brute_force(&values, query, tol);
                let observed = from_range(&search, search.find_range(query, tol));
                assert_eq!(expected, observed, "query {query} tol {tol}");
            }
        }
    }

    #[test]
    fn test_permutation_invariance() {
        let base: Vec<f64> = vec![500.1, 500.2, 250.0, 750.25, 500.15, 100.0, 999.9, 500.3];
        let mut permuted = base.clone();
        permuted.reverse();
        permuted.swap(1, 5);
        let a = SearchRange::from_values(&base, true);
        let b = SearchRange::from_values(&permuted, true);
        for query in [100.0, 500.2, 750.0, 250.1, 1000.0] {
            let ra = from_range(&a, a.find_range(query, 0.1));
            let rb = from_range(&b, b.find_range(query, 0.1));
            assert_eq!(ra, rb);
        }
    }

    #[test]
    fn test_original_indices() {
        let values = vec![30.0f64, 10.0, 20.0, 10.05];
        let search = SearchRange::from_values(&values, true);
        let mut hits = search.find_original_indices(10.0, 0.1);
        hits.sort();
        assert_eq!(hits, vec![1, 3]);
        assert_eq!(search.original_index(0), 1);
        assert_eq!(search.original_index(3), 0);
    }

    #[test]
    fn test_cross_type_queries() {
        let search = SearchRange::from_values(&[10i32, 12, 15, 20], true);
        // 11.4 rounds to 11, tolerance 1.6 rounds to 2
        assert_eq!(search.find_range(11.4f64, 1.6), Some((0, 1)));
        assert_eq!(search.find_range(11.6f64, 0.6), Some((1, 1)));
        assert_eq!(search.find_range(17i32, 2), Some((2, 2)));

        let search = SearchRange::from_values(&[1.5f32, 2.5, 3.5], false);
        assert_eq!(search.find_range(2.5f64, 1.0), Some((0, 2)));

        // Loading a different type replaces the old payload
        let mut search = search;
        search.load(&[100.0f64], false);
        assert!(matches!(search.data(), SearchData::Double(_)));
        assert_eq!(search.find_range(100i32, 0), Some((0, 0)));
    }

    #[test]
    fn test_find_value_range_slice() {
        let mzs = [100.0, 100.004, 100.01, 200.0];
        assert_eq!(find_value_range(&mzs, 100.005, 0.006), Some((0, 2)));
        assert_eq!(find_value_range(&mzs, 150.0, 1.0), None);
    }
}
