use std::io::{self, prelude::*};

use serde::Serialize;
use tracing::{debug, info};

use mzsic::mrm::MrmTransitionResult;
use mzsic::progress::ProgressRecord;
use mzsic::reporter::ReporterIonScan;
use mzsic::sic::{SicDetails, SicResultSink};
use mzsic::similarity::UniqueMzListItem;
use mzsic::{ParentIon, PipelineOutput, ScanList};

use crate::import::ImportSummary;

/// One line of output. Every line is a JSON object whose `record` field names its kind.
#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum OutputRecord<'a> {
    Sic {
        parent_ion_index: usize,
        mz: f64,
        survey_scan_number: Option<i32>,
        details: &'a SicDetails,
        smoothed: &'a [f64],
    },
    ParentIon {
        parent_ion_index: usize,
        #[serde(flatten)]
        parent_ion: &'a ParentIon,
    },
    MrmTransition(&'a MrmTransitionResult),
    ReporterIons(&'a ReporterIonScan),
    SimilarIons(&'a UniqueMzListItem),
    Summary {
        import: &'a ImportSummary,
        progress: &'a ProgressRecord,
        incomplete: bool,
    },
}

/// Writes each record as a single line of JSON
pub struct JsonLinesWriter<W: Write> {
    handle: io::BufWriter<W>,
    survey_scan_numbers: Vec<i32>,
    records_written: usize,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(handle: W) -> Self {
        Self {
            handle: io::BufWriter::new(handle),
            survey_scan_numbers: Vec::new(),
            records_written: 0,
        }
    }

    /// Remember the survey scan numbers so SIC records can name their anchor scan
    pub fn with_scan_list(mut self, scan_list: &ScanList) -> Self {
        self.survey_scan_numbers = scan_list
            .survey_scans
            .iter()
            .map(|s| s.scan_number)
            .collect();
        self
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn write_record(&mut self, record: &OutputRecord<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.handle, record)?;
        self.handle.write_all(b"\n")?;
        self.records_written += 1;
        Ok(())
    }

    /// Write everything the pipeline produced besides the SICs, ending with the summary
    pub fn write_results(
        &mut self,
        scan_list: &ScanList,
        output: &PipelineOutput,
        import: &ImportSummary,
    ) -> io::Result<()> {
        for (parent_ion_index, parent_ion) in scan_list.parent_ions.iter().enumerate() {
            self.write_record(&OutputRecord::ParentIon {
                parent_ion_index,
                parent_ion,
            })?;
        }
        for transition in output.mrm_transitions.iter() {
            self.write_record(&OutputRecord::MrmTransition(transition))?;
        }
        for scan in output.reporter_ions.iter() {
            self.write_record(&OutputRecord::ReporterIons(scan))?;
        }
        for cluster in output.similar_ion_clusters.iter() {
            self.write_record(&OutputRecord::SimilarIons(cluster))?;
        }
        self.write_record(&OutputRecord::Summary {
            import,
            progress: &output.progress,
            incomplete: output.incomplete,
        })?;
        debug!("Wrote {} records", self.records_written);
        Ok(())
    }

    pub fn close(mut self) -> io::Result<W> {
        self.handle.flush()?;
        info!("Finished writing {} records", self.records_written);
        self.handle.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write> SicResultSink for JsonLinesWriter<W> {
    fn accept(
        &mut self,
        parent_ion_index: usize,
        parent_ion: &ParentIon,
        details: &SicDetails,
        smoothed: &[f64],
    ) -> io::Result<()> {
        let survey_scan_number = self
            .survey_scan_numbers
            .get(parent_ion.survey_scan_index)
            .copied();
        self.write_record(&OutputRecord::Sic {
            parent_ion_index,
            mz: parent_ion.mz,
            survey_scan_number,
            details,
            smoothed,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mzsic::ScanInfo;

    #[test]
    fn test_write_lines() -> io::Result<()> {
        let mut scan_list = ScanList::new();
        scan_list.add_survey_scan(ScanInfo::new(7, 0.5, 1));
        scan_list.parent_ions.push(ParentIon::new(500.25, 0));

        let mut writer = JsonLinesWriter::new(Vec::new()).with_scan_list(&scan_list);
        let details = SicDetails::default();
        writer.accept(0, &scan_list.parent_ions[0], &details, &[1.0, 2.0])?;
        writer.write_results(&scan_list, &PipelineOutput::default(), &ImportSummary::default())?;
        assert_eq!(writer.records_written(), 3);
        let buffer = writer.close()?;

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["record"], "sic");
        assert_eq!(lines[0]["survey_scan_number"], 7);
        assert_eq!(lines[0]["smoothed"][1], 2.0);
        assert_eq!(lines[1]["record"], "parent_ion");
        assert_eq!(lines[1]["mz"], 500.25);
        assert_eq!(lines[2]["record"], "summary");
        assert_eq!(lines[2]["incomplete"], false);
        Ok(())
    }
}
