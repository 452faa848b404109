//! Scan metadata for a run: survey scans, fragmentation scans and the parent ions
//! linking them.
use serde::{Deserialize, Serialize};

use crate::parent_ion::ParentIon;
use crate::spectrum::Spectrum;

/// Which scan list an index refers to
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanType {
    #[default]
    Survey,
    Fragmentation,
}

/// One daughter m/z window monitored by an MRM scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MrmMassRange {
    pub start_mz: f64,
    pub end_mz: f64,
    pub central_mz: f64,
}

impl MrmMassRange {
    pub fn new(start_mz: f64, end_mz: f64) -> Self {
        Self {
            start_mz,
            end_mz,
            central_mz: (start_mz + end_mz) / 2.0,
        }
    }

    /// Half the width of the window, used as the daughter m/z tolerance
    pub fn half_width(&self) -> f64 {
        (self.end_mz - self.start_mz).abs() / 2.0
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MrmScanInfo {
    pub parent_mz: f64,
    pub mass_ranges: Vec<MrmMassRange>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    pub scan_number: i32,
    /// Acquisition time in minutes
    pub scan_time: f64,
    pub ms_level: u8,
    /// Set for selected ion monitoring scans. Scans sharing an index cover the same m/z window.
    pub sim_index: Option<i32>,
    pub mrm: Option<MrmScanInfo>,
    pub is_dia: bool,
    pub precursor_mz: Option<f64>,
    /// For fragmentation scans, the survey scan acquired before it
    pub survey_scan_index: Option<usize>,
    pub base_peak_mz: f64,
    pub base_peak_intensity: f64,
    pub total_ion_intensity: f64,
    pub minimum_positive_intensity: f64,
    pub ion_count: usize,
}

impl ScanInfo {
    pub fn new(scan_number: i32, scan_time: f64, ms_level: u8) -> Self {
        Self {
            scan_number,
            scan_time,
            ms_level,
            ..Default::default()
        }
    }

    pub fn is_sim(&self) -> bool {
        self.sim_index.is_some()
    }

    pub fn is_mrm(&self) -> bool {
        self.mrm.is_some()
    }

    /// Fill in the summary statistics of `spectrum`
    pub fn update_from_spectrum(&mut self, spectrum: &Spectrum) {
        let (mz, inten) = spectrum.base_peak().unwrap_or_default();
        self.base_peak_mz = mz;
        self.base_peak_intensity = inten;
        self.total_ion_intensity = spectrum.tic();
        self.minimum_positive_intensity = spectrum.minimum_positive_intensity();
        self.ion_count = spectrum.ion_count();
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScanList {
    pub survey_scans: Vec<ScanInfo>,
    pub fragmentation_scans: Vec<ScanInfo>,
    /// Append-only during import. Other structures refer to parent ions by position.
    pub parent_ions: Vec<ParentIon>,
    /// Set when an operation was cancelled before it finished
    pub processing_incomplete: bool,
}

impl ScanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_survey_scan(&mut self, scan: ScanInfo) -> usize {
        self.survey_scans.push(scan);
        self.survey_scans.len() - 1
    }

    /// Add a fragmentation scan, linking it to the most recent survey scan if it
    /// does not already name one
    pub fn add_fragmentation_scan(&mut self, mut scan: ScanInfo) -> usize {
        if scan.survey_scan_index.is_none() && !self.survey_scans.is_empty() {
            scan.survey_scan_index = Some(self.survey_scans.len() - 1);
        }
        self.fragmentation_scans.push(scan);
        self.fragmentation_scans.len() - 1
    }

    pub fn scan(&self, scan_type: ScanType, index: usize) -> Option<&ScanInfo> {
        match scan_type {
            ScanType::Survey => self.survey_scans.get(index),
            ScanType::Fragmentation => self.fragmentation_scans.get(index),
        }
    }

    /// Find the survey scan with `scan_number`, or the one immediately after it
    pub fn find_survey_scan_index(&self, scan_number: i32) -> Option<usize> {
        match self
            .survey_scans
            .binary_search_by(|s| s.scan_number.cmp(&scan_number))
        {
            Ok(i) => Some(i),
            Err(i) if i < self.survey_scans.len() => Some(i),
            Err(_) => None,
        }
    }

    /// The survey scans belonging to one SIM window, or to no SIM window when `sim_index` is `None`
    pub fn survey_scan_indices_for(&self, sim_index: Option<i32>) -> Vec<usize> {
        self.survey_scans
            .iter()
            .enumerate()
            .filter(|(_, s)| s.sim_index == sim_index)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn sim_indices(&self) -> Vec<i32> {
        let mut indices: Vec<i32> = self
            .survey_scans
            .iter()
            .filter_map(|s| s.sim_index)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    pub fn sim_data_present(&self) -> bool {
        self.survey_scans.iter().any(|s| s.is_sim())
    }

    pub fn mrm_data_present(&self) -> bool {
        self.fragmentation_scans.iter().any(|s| s.is_mrm())
    }

    pub fn is_empty(&self) -> bool {
        self.survey_scans.is_empty() && self.fragmentation_scans.is_empty()
    }
}
