//! Execution of a single sub-analysis.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analysis::AnalysisKind;
use crate::backend::{EngineBackend, OmissionStep};
use crate::cancel::CancelFlag;
use crate::context::TaskContext;
use crate::error::{AnalysisError, EngineError};
use crate::job::{JobDescriptor, JobResult};
use crate::template::MATERIAL_FILE_NAME;

/// Runs one [`JobDescriptor`] against an engine backend.
///
/// A runner never lets an error or a panic escape [`SubAnalysisRunner::run`]:
/// failures become [`JobResult::Failure`] plus a warning on the task context.
/// Cancellation is polled before each expensive step; an engine call that has
/// already started runs to completion first.
pub struct SubAnalysisRunner<K: AnalysisKind> {
    job: JobDescriptor,
    backend: Arc<dyn EngineBackend>,
    kind: Arc<K>,
    omission: Option<Arc<OmissionStep>>,
    context: Arc<dyn TaskContext>,
    keep_failed_outputs: bool,
    cancel: CancelFlag,
}

impl<K: AnalysisKind> SubAnalysisRunner<K> {
    pub fn new(
        job: JobDescriptor,
        backend: Arc<dyn EngineBackend>,
        kind: Arc<K>,
        omission: Option<Arc<OmissionStep>>,
        context: Arc<dyn TaskContext>,
        keep_failed_outputs: bool,
    ) -> Self {
        SubAnalysisRunner {
            job,
            backend,
            kind,
            omission,
            context,
            keep_failed_outputs,
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn run(&self) -> JobResult<K::Output> {
        let index = self.job.index;
        if self.is_cancelled() {
            return JobResult::Cancelled { index };
        }

        let work_dir = self.job.work_dir(self.context.working_directory());
        let outcome = match fs::create_dir_all(&work_dir) {
            Ok(()) => panic::catch_unwind(AssertUnwindSafe(|| self.process(&work_dir)))
                .unwrap_or_else(|payload| Err(EngineError::new(panic_message(payload)))),
            Err(e) => Err(EngineError::from(e)),
        };

        match outcome {
            Ok(Some(value)) => {
                remove_work_dir(&work_dir);
                debug!(job = index, "job completed");
                JobResult::Success { index, value }
            }
            Ok(None) => {
                remove_work_dir(&work_dir);
                debug!(job = index, "job cancelled");
                JobResult::Cancelled { index }
            }
            Err(err) => {
                if !self.keep_failed_outputs {
                    remove_work_dir(&work_dir);
                }
                let error = AnalysisError::Job {
                    index,
                    label: self.job.label.to_string(),
                    message: err.0,
                };
                self.context.add_warning(error.to_string());
                JobResult::Failure { index, error }
            }
        }
    }

    /// Returns `Ok(None)` when cancellation was observed at a checkpoint.
    fn process(&self, work_dir: &Path) -> Result<Option<K::Output>, EngineError> {
        let job = &self.job;
        let mut input = job.input_file.clone();

        if job.omission.is_active() {
            let step = self
                .omission
                .as_ref()
                .ok_or_else(|| EngineError::new("omission requested but no omission tool is configured"))?;
            self.context.update_message(&format!("Applying omission for {}...", job.label));
            input = step.apply(&input, job.omission.level, work_dir)?;
        }
        if self.is_cancelled() {
            return Ok(None);
        }

        self.context.update_message(&format!("Saving input material file for {}...", job.label));
        fs::copy(job.material_file.as_path(), work_dir.join(MATERIAL_FILE_NAME))?;

        self.context.update_message(&format!("Creating input deck for {}...", job.label));
        let deck = self.backend.build_input_deck(job, &input, work_dir)?;
        if self.is_cancelled() {
            return Ok(None);
        }

        self.context.update_message(&format!("Running analysis for {}...", job.label));
        let raw = self.backend.invoke_engine(job, &deck, work_dir)?;
        if self.is_cancelled() {
            return Ok(None);
        }

        self.context.update_message(&format!("Parsing analysis results for {}...", job.label));
        let output = self.backend.parse_output(&raw)?;
        self.kind.extract(job, output).map(Some)
    }
}

fn remove_work_dir(work_dir: &Path) {
    if let Err(e) = fs::remove_dir_all(work_dir) {
        warn!(dir = %work_dir.display(), error = %e, "cannot delete temporary files");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("engine step panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("engine step panicked: {}", message)
    } else {
        "engine step panicked".to_owned()
    }
}
