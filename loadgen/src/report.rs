//! Summarizes a run and prints it.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::pool::TaskOutcome;
use crate::upload::{UploadKind, UploadState};

/// Aggregated results of a run.
#[derive(Default)]
pub struct RunReport {
    /// Number of objects written with a single put.
    pub single_uploads: u64,
    /// Number of objects written with multipart uploads.
    pub multipart_uploads: u64,
    /// Total number of parts across all multipart uploads.
    pub parts_uploaded: u64,
    /// Bytes accepted by the store.
    pub bytes_written: u64,
    /// Failed tasks, grouped by the protocol state they failed in.
    pub failures: BTreeMap<String, u64>,

    file_sizes: DDSketch,
    upload_timing: DDSketch,
}

impl fmt::Debug for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunReport")
            .field("single_uploads", &self.single_uploads)
            .field("multipart_uploads", &self.multipart_uploads)
            .field("parts_uploaded", &self.parts_uploaded)
            .field("bytes_written", &self.bytes_written)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl RunReport {
    /// Builds a report from the outcomes of a run.
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TaskOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            report.add(outcome);
        }
        report
    }

    /// Adds a single outcome to the report.
    pub fn add(&mut self, outcome: &TaskOutcome) {
        match &outcome.result {
            Ok(kind) => {
                match kind {
                    UploadKind::Single { .. } => self.single_uploads += 1,
                    UploadKind::Multipart { parts, .. } => {
                        self.multipart_uploads += 1;
                        self.parts_uploaded += *parts as u64;
                    }
                }
                let written = kind.bytes_written();
                self.bytes_written += written;
                self.file_sizes.add(written as f64);
                self.upload_timing.add(outcome.elapsed.as_secs_f64());
            }
            Err(err) => {
                let state = match err.failed_in() {
                    UploadState::Idle => "before upload",
                    UploadState::PartsUploading => "uploading parts",
                    UploadState::Completing => "completing",
                    _ => "other",
                };
                *self.failures.entry(state.to_owned()).or_default() += 1;
            }
        }
    }

    /// Number of objects written.
    pub fn successes(&self) -> u64 {
        self.single_uploads + self.multipart_uploads
    }

    /// Number of failed tasks.
    pub fn failure_count(&self) -> u64 {
        self.failures.values().sum()
    }

    /// Prints the report to stdout.
    pub fn print(&self, duration: Duration) {
        println!();
        print!(
            "{} ({} objects",
            "UPLOADS:".bold().green(),
            self.successes().bold()
        );
        let failures = self.failure_count();
        if failures > 0 {
            print!(", {}", format!("{failures} FAILURES").bold().red());
        }
        println!(")");

        println!(
            "  single: {}; multipart: {} ({} parts)",
            self.single_uploads.bold(),
            self.multipart_uploads.bold(),
            self.parts_uploaded
        );
        for (state, count) in &self.failures {
            println!("  failed {state}: {}", count.red());
        }

        let sketch = &self.file_sizes;
        if sketch.count() > 0 {
            let avg = sketch.sum().unwrap_or_default() / sketch.count() as f64;
            let avg = ByteSize::b(avg as u64);
            let p50 = ByteSize::b(quantile(sketch, 0.5) as u64);
            let p99 = ByteSize::b(quantile(sketch, 0.99) as u64);
            println!(
                "  size avg: {}; p50: {p50:.2}; p99: {p99:.2}",
                avg.bold()
            );

            let ops = sketch.count() as f64 / duration.as_secs_f64();
            let throughput = (self.bytes_written as f64 / duration.as_secs_f64()) as u64;
            println!(
                "  {:.2} objects/s, {:.2}/s",
                ops.bold(),
                ByteSize::b(throughput).bold()
            );
            print_percentiles(&self.upload_timing);
        }
    }
}

fn quantile(sketch: &DDSketch, q: f64) -> f64 {
    sketch.quantile(q).ok().flatten().unwrap_or_default()
}

fn print_percentiles(sketch: &DDSketch) {
    let ops = sketch.count();
    if ops == 0 {
        return;
    }
    let avg = Duration::from_secs_f64(sketch.sum().unwrap_or_default() / ops as f64);
    let p50 = Duration::from_secs_f64(quantile(sketch, 0.5));
    let p90 = Duration::from_secs_f64(quantile(sketch, 0.9));
    let p99 = Duration::from_secs_f64(quantile(sketch, 0.99));
    println!(
        "  latency avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}
