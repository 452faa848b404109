pub mod search_range;
pub mod spectrum;
pub mod cache;
pub mod options;
pub mod error;
pub mod progress;
pub mod scan;
pub mod parent_ion;
pub mod peak_finder;
pub mod sic;
pub mod mrm;
pub mod binning;
pub mod correlation;
pub mod reporter;
pub mod similarity;
pub mod api;

pub use crate::api::{run_sic_pipeline, PipelineOutput, SicPipeline};
pub use crate::cache::{SpectrumCache, SpectrumSource};
pub use crate::error::{MrmError, PipelineError, SicError, SimilarityError, SpectrumCacheError};
pub use crate::options::SicPipelineOptions;
pub use crate::parent_ion::{ParentIon, ParentIonCandidate, ParentIonTracker};
pub use crate::scan::{ScanInfo, ScanList};
pub use crate::spectrum::Spectrum;
