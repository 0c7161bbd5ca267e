use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::PipelineReport;
use crate::progress::{ProgressEvent, ProgressSink};

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Human-readable progress on stdout. Diagnostics go through `tracing` on
/// stderr.
pub struct ConsoleOutput {
    color: bool,
}

impl ConsoleOutput {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn line(&self, text: String) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
    }

    pub fn print_report(&self, report: &PipelineReport) {
        self.line(self.paint(CYAN, "Enrichment summary"));
        self.line(format!("  input: {} ({} keys)", report.input, report.keys));
        if report.input_materialized {
            self.line(self.paint(YELLOW, "  input list was missing; default list written"));
        }
        for stage in &report.stages {
            let color = if stage.keys_failed == 0 { GREEN } else { YELLOW };
            let mut text = format!(
                "  {}: {} rows, {}/{} keys failed",
                stage.stage.title(),
                stage.rows_written,
                stage.keys_failed,
                stage.keys_total
            );
            if let Some(sequences) = stage.sequences_written {
                text.push_str(&format!(", {sequences} sequences"));
            }
            self.line(self.paint(color, &text));
            for failure in &stage.failures {
                self.line(self.paint(RED, &format!("    {}: {}", failure.key, failure.message)));
            }
        }
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage, total } => {
                self.line(self.paint(CYAN, &format!("{} ({total} keys)", stage.title())));
            }
            ProgressEvent::KeyFinished {
                key,
                progress,
                error,
                ..
            } => {
                if let Some(error) = error {
                    self.line(self.paint(RED, &format!("Error processing {key}: {error}")));
                }
                self.line(progress.to_string());
            }
            ProgressEvent::Warning { key, message, .. } => {
                self.line(self.paint(YELLOW, &format!("Warning for {key}: {message}")));
            }
            ProgressEvent::StageFinished {
                stage,
                outputs,
                elapsed,
            } => {
                self.line(self.paint(
                    GREEN,
                    &format!(
                        "{} saved to {} in {:.1}s",
                        stage.title(),
                        outputs.join(", "),
                        elapsed.as_secs_f64()
                    ),
                ));
            }
        }
    }
}

/// Machine-readable mode: silent while running, one JSON document at the end.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &PipelineReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
