//! Three-phase migration: paths, then identifiers, then the filesystem.

mod id_phase;
mod path_phase;
pub mod plan;
mod sync_phase;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::identifier::{EncodedId, IdentifierRegistry, ItemId, SwapRule, TextForm};
use crate::paths::{FsResolver, RuleSet};
use crate::progress::{Phase, ProgressReporter};
use crate::report::{Diagnostics, MigrationReport};
use crate::timestamps::{DiskTimes, FileTimes};
use plan::JobFile;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rusqlite::types::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Init,
    PathRewrite,
    IdentifierRewrite,
    FilesystemSync,
    Done,
    Failed,
}

/// Answer to "this job would modify its own source file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Proceed,
    Skip,
}

/// Asked once when a job's target is its own source. After the first `Proceed`
/// the question is not asked again during the run.
pub trait Acknowledge: Send + Sync {
    fn acknowledge(&self, path: &Path) -> Acknowledgement;
}

/// Never work on original files.
pub struct DeclineAll;

impl Acknowledge for DeclineAll {
    fn acknowledge(&self, _path: &Path) -> Acknowledgement {
        Acknowledgement::Skip
    }
}

/// Always allow working on original files.
pub struct AcceptAll;

impl Acknowledge for AcceptAll {
    fn acknowledge(&self, _path: &Path) -> Acknowledgement {
        Acknowledgement::Proceed
    }
}

/// Everything the phases share. Immutable apart from the registry and diagnostics,
/// which do their own locking.
pub(crate) struct RunContext<'a> {
    pub config: &'a AppConfig,
    pub rules: RuleSet,
    pub resolver: FsResolver,
    pub registry: IdentifierRegistry,
    pub diagnostics: Diagnostics,
    pub file_times: &'a dyn FileTimes,
    acknowledger: &'a dyn Acknowledge,
    acknowledged: AtomicBool,
}

impl<'a> RunContext<'a> {
    fn new(
        config: &'a AppConfig,
        file_times: &'a dyn FileTimes,
        acknowledger: &'a dyn Acknowledge,
    ) -> Result<Self> {
        let swap = config.swap_rule()?;
        Ok(Self {
            config,
            rules: config.path_rule_set()?,
            resolver: FsResolver::new(config.fs_rule_set()?, config.target_root.clone()),
            registry: IdentifierRegistry::new(swap),
            diagnostics: Diagnostics::new(config.log_no_warnings),
            file_times,
            acknowledger,
            acknowledged: AtomicBool::new(false),
        })
    }

    pub fn swap(&self) -> &SwapRule {
        self.registry.swap_rule()
    }

    /// Report a job that targets its own source and ask whether to go ahead.
    /// Once the user has agreed, later in-place jobs go ahead without a report.
    pub fn confirm_in_place(&self, path: &Path) -> bool {
        if self.acknowledged.load(Ordering::SeqCst) {
            debug!("Working on the original file {}", path.display());
            return true;
        }
        self.diagnostics.same_source_target(path);
        match self.acknowledger.acknowledge(path) {
            Acknowledgement::Proceed => {
                self.acknowledged.store(true, Ordering::SeqCst);
                true
            }
            Acknowledgement::Skip => {
                info!("Skipping {}", path.display());
                false
            }
        }
    }
}

/// Runs a migration described by an [`AppConfig`].
pub struct Migrator {
    config: AppConfig,
    state: MigrationState,
    file_times: Box<dyn FileTimes>,
    acknowledger: Box<dyn Acknowledge>,
}

impl Migrator {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: MigrationState::Init,
            file_times: Box::new(DiskTimes),
            acknowledger: Box::new(DeclineAll),
        }
    }

    pub fn with_file_times(mut self, file_times: impl FileTimes + 'static) -> Self {
        self.file_times = Box::new(file_times);
        self
    }

    pub fn with_acknowledger(mut self, acknowledger: impl Acknowledge + 'static) -> Self {
        self.acknowledger = Box::new(acknowledger);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Run all phases. Configuration problems abort before anything is written;
    /// failures of single jobs are recorded in the report and the run continues.
    pub fn run(&mut self, progress: &dyn ProgressReporter) -> Result<MigrationReport> {
        self.state = MigrationState::Init;
        let result = self.run_phases(progress);
        if result.is_err() {
            self.state = MigrationState::Failed;
        }
        result
    }

    fn run_phases(&mut self, progress: &dyn ProgressReporter) -> Result<MigrationReport> {
        self.config.validate()?;
        let ctx = RunContext::new(&self.config, self.file_times.as_ref(), self.acknowledger.as_ref())?;
        let pool = build_pool(self.config.workers)?;

        info!("Planning jobs below {}", self.config.source_root.display());
        let mut jobs = plan::build_plan(&ctx)?;
        info!("{} files to migrate", jobs.len());

        let structured: Vec<JobFile> = jobs.iter().filter(|j| j.kind.is_structured()).cloned().collect();

        // Phase 1
        self.state = MigrationState::PathRewrite;
        let results = run_jobs(&ctx, pool.as_ref(), Phase::PathRewrite, &structured, progress, path_phase::run);
        let mut failed: Vec<usize> = Vec::new();
        for (job, result) in structured.iter().zip(results) {
            if let Err(e) = result {
                ctx.diagnostics.job_failed(&job.source, &e);
                failed.push(job.index);
            }
        }
        let structured: Vec<JobFile> = structured
            .into_iter()
            .filter(|j| !failed.contains(&j.index))
            .collect();

        // Phase 2
        self.state = MigrationState::IdentifierRewrite;
        let summary = ctx.registry.finalize();
        for group in &summary.merges {
            ctx.diagnostics.merge_group(group);
        }
        let results = run_jobs(&ctx, pool.as_ref(), Phase::IdentifierRewrite, &structured, progress, id_phase::run);
        for (job, result) in structured.iter().zip(results) {
            match result {
                Ok(Some(relocated)) => {
                    if let Some(entry) = jobs.iter_mut().find(|j| j.index == job.index) {
                        entry.target = relocated;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    ctx.diagnostics.job_failed(&job.source, &e);
                    failed.push(job.index);
                }
            }
        }

        // Phase 3
        self.state = MigrationState::FilesystemSync;
        let copies: Vec<JobFile> = jobs.iter().filter(|j| !j.kind.is_structured()).cloned().collect();
        let results = run_jobs(&ctx, pool.as_ref(), Phase::FilesystemSync, &copies, progress, sync_phase::copy);
        for (job, result) in copies.iter().zip(results) {
            if let Err(e) = result {
                ctx.diagnostics.job_failed(&job.source, &e);
            }
        }
        for job in jobs.iter().filter(|j| j.entity().is_some() && !failed.contains(&j.index)) {
            if let Err(e) = sync_phase::timestamps(&ctx, job) {
                ctx.diagnostics.job_failed(&job.target, &Error::job(&job.target, e));
            }
        }

        self.state = MigrationState::Done;
        Ok(ctx.diagnostics.report(self.state))
    }
}

fn build_pool(workers: usize) -> Result<Option<ThreadPool>> {
    if workers <= 1 {
        return Ok(None);
    }
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map(Some)
        .map_err(|e| Error::Other(format!("cannot start worker pool: {}", e)))
}

/// Run `f` for every job of one phase; results keep the job order.
fn run_jobs<T, F>(
    ctx: &RunContext<'_>,
    pool: Option<&ThreadPool>,
    phase: Phase,
    jobs: &[JobFile],
    progress: &dyn ProgressReporter,
    f: F,
) -> Vec<Result<T>>
where
    T: Send,
    F: Fn(&RunContext<'_>, &JobFile) -> Result<T> + Sync,
{
    info!("{}: {} jobs", phase, jobs.len());
    progress.on_phase_start(phase, jobs.len());
    let start = Instant::now();

    let one = |job: &JobFile| {
        if job.no_log {
            debug!("{}: {}", phase, job.source.display());
        } else {
            info!("{}: {}", phase, job.source.display());
        }
        let result = f(ctx, job).map_err(|e| Error::job(&job.source, e));
        progress.on_job_done(phase, &job.relative);
        result
    };

    let results = match pool {
        Some(pool) => pool.install(|| jobs.par_iter().map(one).collect()),
        None => jobs.iter().map(one).collect(),
    };

    let elapsed = start.elapsed().as_secs_f64();
    debug!("{} finished in {:.2}s", phase, elapsed);
    progress.on_phase_complete(phase, elapsed);
    results
}

/// Identifier stored in a database cell, in whatever shape the cell holds it.
pub(crate) fn encoded_of(value: &Value) -> Option<EncodedId> {
    match value {
        Value::Blob(bytes) => Some(EncodedId::Binary(bytes.clone())),
        Value::Text(text) => Some(EncodedId::Text(text.clone())),
        _ => None,
    }
}

pub(crate) fn value_of(encoded: EncodedId) -> Value {
    match encoded {
        EncodedId::Binary(bytes) => Value::Blob(bytes),
        EncodedId::Text(text) => Value::Text(text),
    }
}

/// Read an entity's own identifier: raw bytes or plain hex text.
pub(crate) fn entity_id(value: &Value, swap: &SwapRule) -> Option<ItemId> {
    use crate::identifier::Encoding;
    match value {
        Value::Blob(bytes) => ItemId::from_slice(bytes),
        Value::Text(text) => {
            let encoding = match TextForm::of(text)? {
                TextForm::Hex => Encoding::Str,
                TextForm::Dashed => Encoding::StrDash,
            };
            ItemId::decode(&EncodedId::Text(text.clone()), encoding, swap)
        }
        _ => None,
    }
}
