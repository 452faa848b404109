use mzdata::spectrum::MultiLayerSpectrum;
use mzpeaks::{CentroidPeak, DeconvolutedPeak};

pub(crate) type CPeak = CentroidPeak;
pub(crate) type DPeak = DeconvolutedPeak;
pub(crate) type SpectrumType = MultiLayerSpectrum<CPeak, DPeak>;

/// How many spectra are read between progress messages
pub(crate) const IMPORT_PROGRESS_INTERVAL: usize = 5_000;
/// The name of the configuration file read from the working directory
pub(crate) const LOCAL_CONFIG_FILE: &str = "mzsicer.toml";
pub(crate) const ENV_PREFIX: &str = "MZSICER_";
