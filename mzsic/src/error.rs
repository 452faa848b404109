//! Error types for the fatal paths of each component.
//!
//! Degraded conditions are logged and substituted where they occur instead of
//! surfacing here.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpectrumCacheError {
    #[error("An I/O error occurred while reading spectrum {scan_number} from the page file: {source}")]
    ReadFailed {
        scan_number: i32,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write spectrum {scan_number} to the page file after {attempts} attempts: {source}")]
    WriteFailed {
        scan_number: i32,
        attempts: usize,
        #[source]
        source: io::Error,
    },
    #[error("Could not create a spectrum cache page file in {folder} after {attempts} attempts")]
    PageFileCreationFailed { folder: PathBuf, attempts: usize },
    #[error("The spectrum cache has already been closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeakFinderError {
    #[error("Cannot compute statistics for an empty trace")]
    EmptyTrace,
    #[error("The requested range {start}..={end} does not fit a trace of {length} points")]
    InvalidRange {
        start: usize,
        end: usize,
        length: usize,
    },
}

#[derive(Debug, Error)]
pub enum SicError {
    #[error("Failed to retrieve the spectrum for scan {0} while building SICs")]
    UncachingSpectrum(i32),
    #[error("Failed to compute noise statistics for the SIC at m/z {mz:.4}: {source}")]
    NoiseStatistics {
        mz: f64,
        #[source]
        source: PeakFinderError,
    },
    #[error("Invalid index while preparing an m/z chunk: {0}")]
    InvalidChunkIndex(String),
    #[error("Failed to write a SIC to its destination: {0}")]
    ResultSink(#[from] io::Error),
    #[error(transparent)]
    Cache(#[from] SpectrumCacheError),
}

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("Parent ion {0} does not exist")]
    InvalidParentIonIndex(usize),
    #[error(transparent)]
    Cache(#[from] SpectrumCacheError),
}

#[derive(Debug, Error)]
pub enum MrmError {
    #[error("MRM parent ion {parent_ion_index} refers to fragmentation scan {fragmentation_scan_index}, which does not exist")]
    InvalidFragmentationScanIndex {
        parent_ion_index: usize,
        fragmentation_scan_index: usize,
    },
    #[error(transparent)]
    Sic(#[from] SicError),
    #[error(transparent)]
    Cache(#[from] SpectrumCacheError),
}

/// Any failure the full pipeline can report
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Sic(#[from] SicError),
    #[error(transparent)]
    Mrm(#[from] MrmError),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
    #[error(transparent)]
    Cache(#[from] SpectrumCacheError),
}
