//! * High level APIs for running the whole SIC pipeline over an imported scan list
use tracing::{debug, info};

use crate::cache::SpectrumSource;
use crate::error::PipelineError;
use crate::mrm::{MrmProcessor, MrmTransitionResult};
use crate::options::SicPipelineOptions;
use crate::progress::{AbortFlag, ProgressRecord};
use crate::reporter::{ReporterIonExtractor, ReporterIonScan};
use crate::scan::ScanList;
use crate::sic::{SicBuilder, SicResultSink};
use crate::similarity::{SimilarIonGrouper, UniqueMzListItem};

/// Everything the pipeline produces besides what it writes into the scan list
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct PipelineOutput {
    pub progress: ProgressRecord,
    pub mrm_transitions: Vec<MrmTransitionResult>,
    pub reporter_ions: Vec<ReporterIonScan>,
    pub similar_ion_clusters: Vec<UniqueMzListItem>,
    /// `true` when the run was cancelled and the output is a valid but truncated prefix
    pub incomplete: bool,
}

/// A single-shot pipeline run over `scan_list` with the default peak finder.
///
/// # Arguments
/// - `scan_list`: The imported scans and parent ions. Parent ion peaks and apex overrides are written into it
/// - `spectra`: Where the raw spectra of `scan_list` can be read back from
/// - `sink`: Receives each parent ion's SIC as soon as its peak is stored
/// - `options`: The complete configuration of the run
///
/// # See also
/// [`SicPipeline::run`]
pub fn run_sic_pipeline<S: SpectrumSource + ?Sized, K: SicResultSink + ?Sized>(
    scan_list: &mut ScanList,
    spectra: &mut S,
    sink: &mut K,
    options: &SicPipelineOptions,
) -> Result<PipelineOutput, PipelineError> {
    SicPipeline::new(options.clone()).run(scan_list, spectra, sink)
}

/// The stages of SIC processing in their required order: survey scan SICs, MRM
/// transitions, reporter ions and finally similar parent ion grouping.
///
/// Every stage shares one [`AbortFlag`]. A cancelled stage stops the run, leaving the
/// work of earlier stages intact.
#[derive(Debug, Clone, Default)]
pub struct SicPipeline {
    options: SicPipelineOptions,
    abort: AbortFlag,
}

impl SicPipeline {
    pub fn new(options: SicPipelineOptions) -> Self {
        Self {
            options,
            abort: AbortFlag::default(),
        }
    }

    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn options(&self) -> &SicPipelineOptions {
        &self.options
    }

    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run<S: SpectrumSource + ?Sized, K: SicResultSink + ?Sized>(
        &self,
        scan_list: &mut ScanList,
        spectra: &mut S,
        sink: &mut K,
    ) -> Result<PipelineOutput, PipelineError> {
        let opts = &self.options;
        let mut output = PipelineOutput::default();

        let builder = SicBuilder::new(&opts.sic, &opts.peak_finder).with_abort_flag(self.abort.clone());
        output.progress += builder.build_sics(scan_list, spectra, sink)?;
        if scan_list.processing_incomplete {
            output.incomplete = true;
            return Ok(output);
        }

        if scan_list.mrm_data_present() {
            let processor =
                MrmProcessor::new(&opts.sic, &opts.peak_finder).with_abort_flag(self.abort.clone());
            output.mrm_transitions =
                processor.process(scan_list, spectra, sink, &mut output.progress)?;
            if scan_list.processing_incomplete {
                output.incomplete = true;
                return Ok(output);
            }
        }

        if opts.reporter_ions.enabled {
            let extractor =
                ReporterIonExtractor::new(&opts.reporter_ions).with_abort_flag(self.abort.clone());
            output.reporter_ions = extractor.extract(scan_list, spectra)?;
            output.progress.reporter_ion_scans += output.reporter_ions.len();
            if scan_list.processing_incomplete {
                output.incomplete = true;
                return Ok(output);
            }
        }

        if opts.skip_similarity_grouping {
            debug!("Similar parent ion grouping is disabled");
        } else {
            let grouper = SimilarIonGrouper::new(opts).with_abort_flag(self.abort.clone());
            output.similar_ion_clusters =
                grouper.find_similar_parent_ions(scan_list, spectra, &mut output.progress)?;
            output.incomplete = scan_list.processing_incomplete;
        }

        info!(
            "Processed {} parent ions: {} peaks found, {} synthesized, {} similarity clusters",
            output.progress.parent_ions_processed,
            output.progress.peaks_found,
            output.progress.peaks_synthesized,
            output.progress.similarity_clusters
        );
        Ok(output)
    }
}
