use std::fmt;

/// The three migration phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PathRewrite,
    IdentifierRewrite,
    FilesystemSync,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PathRewrite => "Rewriting paths",
            Phase::IdentifierRewrite => "Rewriting identifiers",
            Phase::FilesystemSync => "Copying files",
        };
        f.write_str(name)
    }
}

/// Trait for reporting migration progress.
///
/// Called from worker threads when `workers > 1`. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_phase_start(&self, _phase: Phase, _jobs: usize) {}
    fn on_job_done(&self, _phase: Phase, _path: &str) {}
    fn on_phase_complete(&self, _phase: Phase, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
