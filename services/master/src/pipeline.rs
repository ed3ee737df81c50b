//! Report publication: transformers render a finalized report, a sink
//! provides the output streams.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use testgrid_report::Report;

/// Errors from report rendering or output.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("report output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Renders one output format of a finalized report.
pub trait ReportTransformer: Send + Sync {
    /// File name for this format of the given report.
    fn file_name(&self, report: &Report) -> String;

    /// Writes the rendered report to the output stream.
    fn transform(&self, report: &Report, out: &mut dyn Write) -> Result<(), PipelineError>;
}

/// Provides the output stream for a rendered report file.
pub trait ReportSink: Send + Sync {
    fn open(&self, file_name: &str) -> Result<Box<dyn Write + Send>, PipelineError>;
}

/// Runs every transformer over a finalized report.
///
/// A failing transformer is logged and skipped; it never blocks the others.
pub struct ReportPipeline {
    transformers: Vec<Box<dyn ReportTransformer>>,
    sink: Box<dyn ReportSink>,
}

impl ReportPipeline {
    pub fn new(transformers: Vec<Box<dyn ReportTransformer>>, sink: Box<dyn ReportSink>) -> Self {
        Self { transformers, sink }
    }

    /// Publishes the report through every transformer. Returns how many
    /// outputs were written.
    pub fn publish(&self, report: &Report) -> usize {
        let mut published = 0;
        for transformer in &self.transformers {
            let file_name = transformer.file_name(report);
            let result = self
                .sink
                .open(&file_name)
                .and_then(|mut out| transformer.transform(report, out.as_mut()));
            match result {
                Ok(()) => {
                    info!(run_id = %report.run_id, file = %file_name, "Report published");
                    published += 1;
                }
                Err(err) => {
                    warn!(
                        run_id = %report.run_id,
                        file = %file_name,
                        %err,
                        "Report transformer failed"
                    );
                }
            }
        }
        published
    }
}

/// Pretty-printed JSON rendering of the full report tree.
pub struct JsonReportTransformer;

impl ReportTransformer for JsonReportTransformer {
    fn file_name(&self, report: &Report) -> String {
        let name: String = report
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let stamp = report.finalized_at.format("%Y%m%dT%H%M%SZ");
        format!("{stamp}-{}-{}.json", name.to_lowercase(), report.run_id)
    }

    fn transform(&self, report: &Report, out: &mut dyn Write) -> Result<(), PipelineError> {
        serde_json::to_writer_pretty(&mut *out, report)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// Writes report files into one directory, created on first use.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ReportSink for DirectorySink {
    fn open(&self, file_name: &str) -> Result<Box<dyn Write + Send>, PipelineError> {
        fs::create_dir_all(&self.dir)?;
        let file = File::create(self.dir.join(file_name))?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testgrid_id::RunId;
    use testgrid_report::{ReportBuilder, TestExecutionResult, TestSection};

    fn finalized_report(name: &str) -> Report {
        let mut builder = ReportBuilder::new(RunId::new());
        builder.initialize_new_report(name).unwrap();
        builder
            .add_to_section("envA", TestSection::new("step 0").info("ok"))
            .unwrap();
        builder
            .finalize_report(TestExecutionResult::Passed)
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn json_transformer_writes_parseable_output() {
        let report = finalized_report("Nightly Suite");
        let transformer = JsonReportTransformer;

        let file_name = transformer.file_name(&report);
        assert!(file_name.contains("-nightly-suite-run_"));
        assert!(file_name.ends_with(".json"));

        let mut buf = Vec::new();
        transformer.transform(&report, &mut buf).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["name"], "Nightly Suite");
        assert_eq!(parsed["result"], "passed");
        assert_eq!(parsed["sections"][0]["name"], "envA");
    }

    #[test]
    fn directory_sink_publishes_into_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("reports");

        let pipeline = ReportPipeline::new(
            vec![Box::new(JsonReportTransformer)],
            Box::new(DirectorySink::new(&target)),
        );
        let report = finalized_report("suite");
        assert_eq!(pipeline.publish(&report), 1);

        let entries: Vec<_> = fs::read_dir(&target).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    struct FailingTransformer;

    impl ReportTransformer for FailingTransformer {
        fn file_name(&self, _report: &Report) -> String {
            "broken.out".to_string()
        }

        fn transform(&self, _report: &Report, _out: &mut dyn Write) -> Result<(), PipelineError> {
            Err(PipelineError::Io(std::io::Error::other("render failed")))
        }
    }

    #[test]
    fn failing_transformer_does_not_block_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ReportPipeline::new(
            vec![Box::new(FailingTransformer), Box::new(JsonReportTransformer)],
            Box::new(DirectorySink::new(dir.path())),
        );
        assert_eq!(pipeline.publish(&finalized_report("suite")), 1);
    }
}
