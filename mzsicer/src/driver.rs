use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use thiserror::Error;

use tracing::{debug, info, warn};

#[cfg(feature = "mzmlb")]
use mzdata::io::mzmlb::MzMLbReaderType;
#[cfg(feature = "thermo")]
use mzdata::io::thermo::ThermoRawReaderType;
use mzdata::prelude::*;
use mzdata::io::{
    infer_format, infer_from_stream, mgf::MGFReaderType, mzml::MzMLReaderType,
    MassSpectrometryFormat, PreBufferedStream, RestartableGzDecoder, StreamingSpectrumIterator,
};

use mzsic::parent_ion::CustomSicTarget;
use mzsic::{PipelineError, ScanList, SicPipeline, SicPipelineOptions, SpectrumCache};

use crate::args::{non_negative_float, ArgEvictionPolicy, ArgReporterIons, ArgTolerance};
use crate::import::{ImportError, ImportSummary, ScanImporter};
use crate::time_range::TimeRange;
use crate::types::{CPeak, DPeak, SpectrumType, ENV_PREFIX, LOCAL_CONFIG_FILE};
use crate::write::JsonLinesWriter;

#[derive(Debug, Error)]
pub enum MZSicerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigurationError(#[from] Box<figment::Error>),
    #[error("The input file format for {0} was either unknown or not supported ({1:?})")]
    FormatUnknownOrNotSupportedError(String, MassSpectrometryFormat),
    #[error("The input file format from STDIN was either unknown or not supported ({0:?})")]
    FormatUnknownOrNotSupportedErrorStdIn(MassSpectrometryFormat),
    #[error("Failed to import spectra: {0}")]
    ImportError(#[from] ImportError),
    #[error("Failed to process the scan list: {0}")]
    PipelineError(#[from] PipelineError),
}

impl From<figment::Error> for MZSicerError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigurationError(Box::new(value))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_default_options(value: &SicPipelineOptions) -> bool {
    *value == SicPipelineOptions::default()
}

/// Selected ion chromatogram extraction and similar parent ion grouping.
///
/// Read a mass spectrometry file or stream, build a chromatogram for every selected
/// precursor, find its peak, group parent ions that are the same species, and write
/// the results as JSON lines.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZSicer {
    /// The path to read the input spectra from, or if '-' is passed, read from STDIN
    #[arg()]
    pub input_file: String,

    /// The path to write the JSON lines output to. Writes to STDOUT when absent or '-'.
    #[arg(short = 'o', long = "output-file")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzsicer.toml` in the working directory.
    /// Environment variables prefixed with `MZSICER_` will be read too, using `__`
    /// to separate nested keys, e.g. `MZSICER_OPTIONS__SIC__SIC_TOLERANCE=5`.
    #[arg(long = "config-file")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,

    /// The time range to process, denoted (start?)-(stop?)
    #[arg(
        short='r',
        long="time-range",
        value_parser=TimeRange::from_str,
        value_name="BEGIN-END",
        long_help=r#"The time range to process, denoted (start?)-(stop?)

If a start is not specified, processing begins from the start of the run.
If a stop is not specified, processing stops at the end of the run.
"#
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,

    /// The m/z tolerance of each chromatogram, e.g. `10ppm` or `0.02da`
    #[arg(short = 't', long = "sic-tolerance", value_parser = ArgTolerance::from_str)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sic_tolerance: Option<ArgTolerance>,

    /// The directory to write spectrum page files to
    #[arg(short = 'c', long = "cache-folder")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_folder: Option<PathBuf>,

    /// The number of spectra to hold in memory before paging to disk
    #[arg(short = 'm', long = "spectra-in-memory")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectra_in_memory: Option<usize>,

    /// How to choose which in-memory spectrum is paged out
    #[arg(long = "eviction-policy")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_policy: Option<ArgEvictionPolicy>,

    /// Keep every spectrum in memory instead of paging to disk
    #[arg(long = "disable-disk-cache")]
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_disk_cache: bool,

    /// Do not group similar parent ions
    #[arg(short = 'x', long = "skip-similarity")]
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_similarity: bool,

    /// Extract reporter ion intensities from fragmentation scans using this label set
    #[arg(short = 'R', long = "reporter-ions")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_ions: Option<ArgReporterIons>,

    /// Fragmentation scans with isolation windows wider than this many m/z are treated as DIA
    #[arg(long = "dia-window-width", value_parser = non_negative_float)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dia_window_width: Option<f64>,

    #[arg(
        skip,
        help = "The complete pipeline configuration, only settable from configuration files and the environment"
    )]
    #[serde(default, skip_serializing_if = "is_default_options")]
    pub options: SicPipelineOptions,

    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_sic_targets: Vec<CustomSicTarget>,
}

impl MZSicer {
    /// Layer the configuration sources under the command line arguments in `self`, lowest
    /// precedence first: `mzsicer.toml`, `--config-file`, `MZSICER_` environment variables.
    pub fn figment(&self) -> Figment {
        let mut figment = Figment::new().merge(Toml::file(LOCAL_CONFIG_FILE));
        if let Some(path) = self.config_file.as_ref() {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(self))
    }

    pub fn configure(self) -> Result<Self, MZSicerError> {
        let this: Self = self.figment().extract()?;
        Ok(this)
    }

    /// The pipeline options with every explicitly passed flag applied on top
    pub fn pipeline_options(&self) -> SicPipelineOptions {
        let mut options = self.options.clone();
        if let Some(tolerance) = self.sic_tolerance {
            options.sic = options.sic.with_tolerance(tolerance.into());
        }
        if let Some(folder) = self.cache_folder.as_ref() {
            options.cache.folder_path = Some(folder.clone());
        }
        if let Some(n) = self.spectra_in_memory {
            options.cache.spectra_to_retain_in_memory = n;
        }
        if let Some(policy) = self.eviction_policy {
            options.cache.eviction_policy = policy.into();
        }
        if self.disable_disk_cache {
            options.cache.disk_caching_always_disabled = true;
        }
        if self.skip_similarity {
            options.skip_similarity_grouping = true;
        }
        if let Some(mode) = self.reporter_ions {
            options.reporter_ions.enabled = true;
            options.reporter_ions.mass_mode = mode.into();
        }
        options
    }

    fn output_path(&self) -> Option<&Path> {
        self.output_file
            .as_deref()
            .filter(|p| *p != Path::new("-"))
    }

    pub fn main(&self) -> Result<(), MZSicerError> {
        info!(
            "mzsicer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file);
        match self.output_path() {
            Some(path) => info!("Output: {}", path.display()),
            None => info!("Output: -"),
        }
        let options = self.pipeline_options();
        debug!("Configuration: {options:?}");

        let start = Instant::now();
        let (mut scan_list, mut cache, summary) = self.reader_then(&options)?;
        info!(
            "Survey Scans: {} | Fragmentation Scans: {} | Parent Ions: {}",
            summary.survey_scans,
            summary.fragmentation_scans,
            scan_list.parent_ions.len()
        );
        if summary.outside_time_range > 0 {
            info!("Skipped {} spectra outside of the time range", summary.outside_time_range);
        }
        if summary.without_survey_scan > 0 {
            warn!(
                "{} fragmentation scans had no preceding survey scan",
                summary.without_survey_scan
            );
        }
        let import_done = Instant::now();
        info!("Import Elapsed Time: {:0.3?}", import_done - start);

        let result = self.writer_then(&options, &mut scan_list, &mut cache, &summary);
        cache.close();
        result?;

        let elapsed = Instant::now() - start;
        info!("Total Elapsed Time: {:0.3?}", elapsed);
        Ok(())
    }

    fn reader_then(
        &self,
        options: &SicPipelineOptions,
    ) -> Result<(ScanList, SpectrumCache, ImportSummary), MZSicerError> {
        let mut importer = ScanImporter::new(options, self.time_range)
            .with_dia_window_width(self.dia_window_width);
        if self.input_file == "-" {
            let mut buffered =
                PreBufferedStream::new_with_buffer_size(io::stdin(), 2usize.pow(20))?;
            let (ms_format, compressed) = infer_from_stream(&mut buffered)?;
            debug!("Detected {ms_format:?} from STDIN (compressed? {compressed})");
            match ms_format {
                MassSpectrometryFormat::MGF => {
                    if compressed {
                        let reader = StreamingSpectrumIterator::new(MGFReaderType::<_, CPeak, DPeak>::new(
                            RestartableGzDecoder::new(io::BufReader::new(buffered)),
                        ));
                        let spectrum_count = reader.spectrum_count_hint();
                        importer.import_all(reader, spectrum_count)?;
                    } else {
                        let reader = StreamingSpectrumIterator::new(MGFReaderType::<_, CPeak, DPeak>::new(buffered));
                        let spectrum_count = reader.spectrum_count_hint();
                        importer.import_all(reader, spectrum_count)?;
                    }
                }
                MassSpectrometryFormat::MzML => {
                    if compressed {
                        let reader = StreamingSpectrumIterator::new(MzMLReaderType::<_, CPeak, DPeak>::new(
                            RestartableGzDecoder::new(io::BufReader::new(buffered)),
                        ));
                        let spectrum_count = reader.spectrum_count_hint();
                        importer.import_all(reader, spectrum_count)?;
                    } else {
                        let reader = StreamingSpectrumIterator::new(MzMLReaderType::<_, CPeak, DPeak>::new(buffered));
                        let spectrum_count = reader.spectrum_count_hint();
                        importer.import_all(reader, spectrum_count)?;
                    }
                }
                _ => {
                    return Err(MZSicerError::FormatUnknownOrNotSupportedErrorStdIn(
                        ms_format,
                    ))
                }
            }
        } else {
            let (ms_format, compressed) = infer_format(&self.input_file)?;
            debug!("Detected {ms_format:?} from path (compressed? {compressed})");
            match ms_format {
                MassSpectrometryFormat::MGF => {
                    if compressed {
                        let fh = RestartableGzDecoder::new(io::BufReader::new(fs::File::open(
                            &self.input_file,
                        )?));
                        let reader = StreamingSpectrumIterator::new(MGFReaderType::<_, CPeak, DPeak>::new(fh));
                        let spectrum_count = reader.spectrum_count_hint();
                        importer.import_all(reader, spectrum_count)?;
                    } else {
                        let reader = MGFReaderType::<_, CPeak, DPeak>::open_path(self.input_file.clone())?;
                        let spectrum_count = Some(reader.len() as u64);
                        importer.import_all(reader, spectrum_count)?;
                    }
                }
                MassSpectrometryFormat::MzML => {
                    if compressed {
                        let fh = RestartableGzDecoder::new(io::BufReader::new(fs::File::open(
                            &self.input_file,
                        )?));
                        let reader = StreamingSpectrumIterator::new(MzMLReaderType::<_, CPeak, DPeak>::new(fh));
                        let spectrum_count = reader.spectrum_count_hint();
                        importer.import_all(reader, spectrum_count)?;
                    } else {
                        let reader = MzMLReaderType::<_, CPeak, DPeak>::open_path(self.input_file.clone())?;
                        let spectrum_count = Some(reader.len() as u64);
                        importer.import_all(reader, spectrum_count)?;
                    }
                }
                #[cfg(feature = "mzmlb")]
                MassSpectrometryFormat::MzMLb => {
                    let reader = MzMLbReaderType::<CPeak, DPeak>::open_path(self.input_file.clone())?;
                    let spectrum_count = Some(reader.len() as u64);
                    importer.import_all(reader, spectrum_count)?;
                }
                #[cfg(feature = "thermo")]
                MassSpectrometryFormat::ThermoRaw => {
                    let reader = ThermoRawReaderType::<CPeak, DPeak>::open_path(self.input_file.clone())?;
                    let spectrum_count = Some(reader.len() as u64);
                    importer.import_all(reader, spectrum_count)?;
                }
                _ => {
                    return Err(MZSicerError::FormatUnknownOrNotSupportedError(
                        self.input_file.clone(),
                        ms_format,
                    ))
                }
            }
        }
        importer.add_custom_sic_targets(&self.custom_sic_targets);
        Ok(importer.finish())
    }

    fn writer_then(
        &self,
        options: &SicPipelineOptions,
        scan_list: &mut ScanList,
        cache: &mut SpectrumCache,
        summary: &ImportSummary,
    ) -> Result<(), MZSicerError> {
        match self.output_path() {
            Some(path) => {
                let handle = fs::File::create(path)?;
                self.run_workflow(handle, options, scan_list, cache, summary)
            }
            None => {
                let handle = io::stdout().lock();
                self.run_workflow(handle, options, scan_list, cache, summary)
            }
        }
    }

    fn run_workflow<W: io::Write>(
        &self,
        handle: W,
        options: &SicPipelineOptions,
        scan_list: &mut ScanList,
        cache: &mut SpectrumCache,
        summary: &ImportSummary,
    ) -> Result<(), MZSicerError> {
        let mut writer = JsonLinesWriter::new(handle).with_scan_list(scan_list);
        let pipeline = SicPipeline::new(options.clone());
        let output = pipeline.run(scan_list, cache, &mut writer)?;
        if output.incomplete {
            warn!("Processing was cancelled, the output is incomplete");
        }
        writer.write_results(scan_list, &output, summary)?;
        writer.close()?;

        let stats = cache.stats();
        debug!(
            "Spectrum cache: {} puts, {} hits, {} misses, {} page writes",
            stats.puts, stats.hits, stats.misses, stats.page_writes
        );
        Ok(())
    }
}
