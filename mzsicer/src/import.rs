use mzdata::prelude::*;
use mzdata::spectrum::bindata::ArrayRetrievalError;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use mzsic::cache::CacheMode;
use mzsic::parent_ion::CustomSicTarget;
use mzsic::{
    ParentIonCandidate, ParentIonTracker, ScanInfo, ScanList, SicPipelineOptions, Spectrum,
    SpectrumCache, SpectrumCacheError,
};

use crate::time_range::TimeRange;
use crate::types::{SpectrumType, IMPORT_PROGRESS_INTERVAL};

/// Read the scan number from a native ID like `controllerType=0 controllerNumber=1 scan=52`
pub(crate) fn parse_scan_number(native_id: &str) -> Option<i32> {
    native_id
        .split_whitespace()
        .find_map(|token| token.strip_prefix("scan="))
        .and_then(|v| v.parse().ok())
}

/// Copy the peaks of an `mzdata` spectrum, preferring centroids over raw arrays
pub(crate) fn convert_spectrum(
    scan_number: i32,
    source: &SpectrumType,
) -> Result<Spectrum, ArrayRetrievalError> {
    if let Some(peaks) = source.peaks.as_ref() {
        let (mzs, intensities) = peaks.iter().map(|p| (p.mz, p.intensity as f64)).unzip();
        return Ok(Spectrum::new(scan_number, mzs, intensities));
    }
    if let Some(arrays) = source.arrays.as_ref() {
        let mzs = arrays.mzs()?;
        let intensities = arrays.intensities()?;
        let n = mzs.len().min(intensities.len());
        if mzs.len() != intensities.len() {
            warn!(
                "Spectrum {} has {} m/z values but {} intensities, truncating to {n}",
                source.id(),
                mzs.len(),
                intensities.len()
            );
        }
        return Ok(Spectrum::new(
            scan_number,
            mzs[..n].to_vec(),
            intensities[..n].iter().map(|v| *v as f64).collect(),
        ));
    }
    Ok(Spectrum::new(scan_number, Vec::new(), Vec::new()))
}

/// The scan level metadata the importer needs from a spectrum
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ScanRecord<'a> {
    pub native_id: &'a str,
    pub index: usize,
    /// Minutes
    pub time: f64,
    pub ms_level: u8,
    pub precursor_mz: Option<f64>,
    pub isolation_width: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub spectra_read: usize,
    pub survey_scans: usize,
    pub fragmentation_scans: usize,
    pub outside_time_range: usize,
    pub without_precursor: usize,
    pub without_survey_scan: usize,
    pub custom_sic_targets: usize,
}

/// Fills a [`ScanList`] and [`SpectrumCache`] from a stream of spectra, creating a parent
/// ion for each distinct precursor of every survey scan.
pub struct ScanImporter {
    tracker: ParentIonTracker,
    time_range: TimeRange,
    dia_window_width: Option<f64>,
    scan_list: ScanList,
    cache: SpectrumCache,
    summary: ImportSummary,
    last_scan_number: i32,
}

impl ScanImporter {
    pub fn new(options: &SicPipelineOptions, time_range: Option<TimeRange>) -> Self {
        let cache = SpectrumCache::new(options.cache.clone());
        Self {
            tracker: ParentIonTracker::new(&options.sic),
            time_range: time_range.unwrap_or_default(),
            dia_window_width: None,
            scan_list: ScanList::new(),
            cache,
            summary: ImportSummary::default(),
            last_scan_number: 0,
        }
    }

    /// Treat fragmentation scans whose isolation window is wider than `width` as DIA scans
    pub fn with_dia_window_width(mut self, width: Option<f64>) -> Self {
        self.dia_window_width = width;
        self
    }

    pub fn summary(&self) -> &ImportSummary {
        &self.summary
    }

    pub fn scan_list(&self) -> &ScanList {
        &self.scan_list
    }

    /// Let the spectrum cache choose how to store a run of `spectrum_count` spectra.
    ///
    /// Has no effect without a count, or once spectra have been imported.
    pub fn plan_for(&mut self, spectrum_count: Option<u64>) -> Option<CacheMode> {
        let count = spectrum_count?;
        if self.summary.spectra_read > 0 {
            debug!("Spectra were already imported, keeping the {:?} cache mode", self.cache.mode());
            return None;
        }
        Some(self.cache.plan_for(count as usize))
    }

    fn next_scan_number(&mut self, native_id: &str, index: usize) -> i32 {
        let scan_number = match parse_scan_number(native_id) {
            Some(n) if n > self.last_scan_number => n,
            Some(n) => {
                let replacement = self.last_scan_number + 1;
                warn!("Scan number {n} of {native_id} does not increase, using {replacement}");
                replacement
            }
            None => (index as i32 + 1).max(self.last_scan_number + 1),
        };
        self.last_scan_number = scan_number;
        scan_number
    }

    /// Add one `mzdata` spectrum to the scan list
    pub fn import_spectrum(&mut self, source: &SpectrumType) -> Result<(), ImportError> {
        let precursor = source.precursor();
        let record = ScanRecord {
            native_id: source.id(),
            index: source.index(),
            time: source.start_time(),
            ms_level: source.ms_level(),
            precursor_mz: precursor.map(|p| p.ion().mz),
            isolation_width: precursor.map(|p| {
                (p.isolation_window.upper_bound - p.isolation_window.lower_bound) as f64
            }),
        };
        self.import_scan(record, |scan_number| convert_spectrum(scan_number, source))
    }

    /// Add one scan to the scan list. Scans outside of the time range are counted and
    /// dropped before their peaks are converted.
    pub fn import_scan<F>(&mut self, record: ScanRecord<'_>, peaks: F) -> Result<(), ImportError>
    where
        F: FnOnce(i32) -> Result<Spectrum, ArrayRetrievalError>,
    {
        self.summary.spectra_read += 1;
        if !self.time_range.contains(record.time) {
            self.summary.outside_time_range += 1;
            return Ok(());
        }
        let scan_number = self.next_scan_number(record.native_id, record.index);
        let spectrum = peaks(scan_number)?;

        let mut info = ScanInfo::new(scan_number, record.time, record.ms_level);
        info.update_from_spectrum(&spectrum);
        self.cache.put(&spectrum, scan_number)?;

        if record.ms_level <= 1 {
            self.scan_list.add_survey_scan(info);
            self.summary.survey_scans += 1;
            return Ok(());
        }

        info.precursor_mz = record.precursor_mz;
        info.is_dia = match (record.isolation_width, self.dia_window_width) {
            (Some(observed), Some(width)) => observed > width,
            _ => false,
        };
        let is_dia = info.is_dia;
        let frag_index = self.scan_list.add_fragmentation_scan(info);
        self.summary.fragmentation_scans += 1;

        let Some(mz) = record.precursor_mz else {
            trace!("Fragmentation scan {scan_number} has no precursor m/z");
            self.summary.without_precursor += 1;
            return Ok(());
        };
        let survey_index = self.scan_list.fragmentation_scans[frag_index].survey_scan_index;
        let mut candidate = ParentIonCandidate::new(survey_index, mz, frag_index);
        candidate.is_dia = is_dia;
        let assigned = self.tracker.add_or_update_parent_ion(
            &mut self.scan_list,
            candidate,
            Some(&mut self.cache),
        )?;
        if assigned.is_none() {
            self.summary.without_survey_scan += 1;
        }
        Ok(())
    }

    pub fn import_all<R: Iterator<Item = SpectrumType>>(
        &mut self,
        reader: R,
        spectrum_count: Option<u64>,
    ) -> Result<(), ImportError> {
        self.plan_for(spectrum_count);
        for (i, spectrum) in reader.enumerate() {
            if self.time_range.is_past(spectrum.start_time()) {
                debug!("Stopped reading at {} past the end of the time range", spectrum.id());
                break;
            }
            self.import_spectrum(&spectrum)?;
            if i > 0 && i % IMPORT_PROGRESS_INTERVAL == 0 {
                info!(
                    "Read {i} spectra | Time={:0.3} | Parent Ions={}",
                    spectrum.start_time(),
                    self.scan_list.parent_ions.len()
                );
            }
        }
        Ok(())
    }

    /// Add parent ions for targets that were not selected by the instrument
    pub fn add_custom_sic_targets(&mut self, targets: &[CustomSicTarget]) {
        for target in targets {
            match self
                .tracker
                .add_custom_sic_target(&mut self.scan_list, target)
            {
                Some(_) => self.summary.custom_sic_targets += 1,
                None => warn!(
                    "No survey scans to anchor the custom SIC target at m/z {:.4}",
                    target.mz
                ),
            }
        }
    }

    pub fn finish(self) -> (ScanList, SpectrumCache, ImportSummary) {
        (self.scan_list, self.cache, self.summary)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Failed to read the arrays of a spectrum: {0}")]
    ArrayRetrieval(#[from] ArrayRetrievalError),
    #[error(transparent)]
    Cache(#[from] SpectrumCacheError),
}
