use indicatif::{ProgressBar, ProgressStyle};
use jellyfin_migrator_core::{Phase, ProgressReporter};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One bar per phase; the total is known from the plan.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.bar().take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_phase_start(&self, phase: Phase, jobs: usize) {
        let pb = ProgressBar::new(jobs as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} {prefix} [{bar:30.cyan/dim}] {pos}/{len} {wide_msg:.dim}",
        )
        .map(|s| s.progress_chars("━╸─").tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_prefix(phase.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_job_done(&self, _phase: Phase, path: &str) {
        if let Some(pb) = self.bar().as_ref() {
            pb.set_message(path.to_string());
            pb.inc(1);
        }
    }

    fn on_phase_complete(&self, phase: Phase, duration_secs: f64) {
        self.finish_bar();
        eprintln!("  \x1b[32m✓\x1b[0m {} done in {:.2}s", phase, duration_secs);
    }
}
