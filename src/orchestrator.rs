//! Splits an analysis request into jobs, runs them on the worker pool and
//! aggregates their results by job index.

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::analysis::AnalysisKind;
use crate::backend::{EngineBackend, OmissionStep};
use crate::cancel::CancelFlag;
use crate::context::TaskContext;
use crate::error::{AnalysisError, RenderError};
use crate::job::{
    Aggregate, EngineCapability, JobDescriptor, JobInput, JobResult, OmissionPolicy, Outcome, MAX_PEAKS,
};
use crate::material::FatigueMaterial;
use crate::pool::WorkerPool;
use crate::runner::SubAnalysisRunner;

/// Which engine backend a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    #[default]
    Inbuilt,
    Safe,
}

/// One user-initiated analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// One entry per job, in job index order.
    pub inputs: Vec<JobInput>,
    pub material: FatigueMaterial,
    pub backend: BackendChoice,
    pub omission: OmissionPolicy,
    /// Peaks per typical flight. Above [`MAX_PEAKS`] an unbounded engine is required.
    pub peaks_per_flight: usize,
    pub flight_file: PathBuf,
    /// Spectrum validity in flights.
    pub validity: u32,
}

impl AnalysisRequest {
    pub fn capability(&self) -> EngineCapability {
        EngineCapability::for_peaks(self.peaks_per_flight)
    }
}

/// The configured engine backends and the rules for choosing between them.
#[derive(Clone)]
pub struct Backends {
    pub inbuilt: Arc<dyn EngineBackend>,
    pub safe: Option<Arc<dyn EngineBackend>>,
    pub fallback_to_inbuilt: bool,
}

impl Backends {
    pub fn new(inbuilt: Arc<dyn EngineBackend>) -> Self {
        Backends {
            inbuilt,
            safe: None,
            fallback_to_inbuilt: false,
        }
    }

    pub fn with_safe(mut self, safe: Arc<dyn EngineBackend>) -> Self {
        self.safe = Some(safe);
        self
    }

    pub fn fallback_to_inbuilt(mut self, fallback: bool) -> Self {
        self.fallback_to_inbuilt = fallback;
        self
    }

    /// Picks the backend that serves `choice` for flights of `capability`.
    ///
    /// A SAFE request falls back to the inbuilt backend, with a warning, when
    /// SAFE cannot handle the flight size, or when SAFE is not configured and
    /// fallback is allowed.
    pub fn select(
        &self,
        choice: BackendChoice,
        capability: EngineCapability,
        context: &dyn TaskContext,
    ) -> Result<Arc<dyn EngineBackend>, AnalysisError> {
        let backend = match (choice, &self.safe) {
            (BackendChoice::Inbuilt, _) => self.inbuilt.clone(),
            (BackendChoice::Safe, Some(safe)) if safe.supports(capability) => safe.clone(),
            (BackendChoice::Safe, Some(_)) => {
                context.add_warning(format!(
                    "Typical flights have more than {} peaks, the SAFE engine cannot be used. \
                     The analysis is performed with the inbuilt extended engine.",
                    MAX_PEAKS
                ));
                self.inbuilt.clone()
            }
            (BackendChoice::Safe, None) if self.fallback_to_inbuilt => {
                context.add_warning("SAFE engine is not configured. The analysis is performed with the inbuilt engine.".into());
                self.inbuilt.clone()
            }
            (BackendChoice::Safe, None) => return Err(AnalysisError::setup("SAFE engine is not configured")),
        };

        if !backend.supports(capability) {
            return Err(AnalysisError::setup(format!(
                "{} engine cannot analyse typical flights with more than {} peaks",
                backend.name(),
                MAX_PEAKS
            )));
        }
        Ok(backend)
    }
}

/// Lifecycle of an [`Orchestrator`]. Every state after `Idle` is entered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    MaterialReady,
    Dispatched,
    Collecting,
    Completed,
    Cancelled,
    /// Setup failed before any job was dispatched.
    Failed,
}

/// Runs one [`AnalysisRequest`] of analysis kind `K`.
///
/// An orchestrator serves exactly one request. [`Orchestrator::cancel`] may be
/// called from any thread while [`Orchestrator::run`] blocks another.
pub struct Orchestrator<K: AnalysisKind> {
    pool: WorkerPool,
    backends: Backends,
    kind: Arc<K>,
    context: Arc<dyn TaskContext>,
    omission: Option<Arc<OmissionStep>>,
    keep_failed_outputs: bool,
    started: AtomicBool,
    state: Mutex<OrchestratorState>,
    cancel: CancelFlag,
    runners: Mutex<Vec<Arc<SubAnalysisRunner<K>>>>,
}

impl<K: AnalysisKind> Orchestrator<K> {
    pub fn new(pool: WorkerPool, backends: Backends, kind: K, context: Arc<dyn TaskContext>) -> Self {
        Orchestrator {
            pool,
            backends,
            kind: Arc::new(kind),
            context,
            omission: None,
            keep_failed_outputs: false,
            started: AtomicBool::new(false),
            state: Mutex::new(OrchestratorState::Idle),
            cancel: CancelFlag::new(),
            runners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_omission(mut self, step: OmissionStep) -> Self {
        self.omission = Some(Arc::new(step));
        self
    }

    /// Keeps the work directories of failed jobs for inspection.
    pub fn keep_failed_outputs(mut self, keep: bool) -> Self {
        self.keep_failed_outputs = keep;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the request and every runner constructed so far. Idempotent.
    pub fn cancel(&self) {
        if self.cancel.cancel() {
            info!("analysis cancellation requested");
        }
        for runner in self.runners.lock().iter() {
            runner.cancel();
        }
    }

    /// Runs `request` to completion, blocking the caller until every job has finished.
    ///
    /// Returns `Ok(Outcome::Completed)` with one slot per input (absent for failed
    /// jobs), `Ok(Outcome::Cancelled)` when cancellation was observed at any point,
    /// or `Err(AnalysisError::Setup)` when nothing could be dispatched.
    pub fn run(&self, request: AnalysisRequest) -> Result<Outcome<K::Output>, AnalysisError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AnalysisError::setup("an orchestrator serves exactly one request"));
        }

        let backend = match self.prepare(&request) {
            Ok(backend) => backend,
            Err(err) => {
                self.enter(OrchestratorState::Failed);
                return Err(err);
            }
        };
        if self.is_cancelled() {
            return Ok(self.cancelled());
        }

        self.context.update_message("Creating material file...");
        let material_file = match backend.material_template().render(
            &request.material,
            self.context.working_directory(),
            &self.cancel,
        ) {
            Ok(path) => Arc::new(path),
            Err(RenderError::Cancelled) => return Ok(self.cancelled()),
            Err(err) => {
                self.enter(OrchestratorState::Failed);
                return Err(err.into());
            }
        };
        self.enter(OrchestratorState::MaterialReady);
        if self.is_cancelled() {
            return Ok(self.cancelled());
        }

        let runners = self.register_runners(&request, &backend, material_file);
        self.enter(OrchestratorState::Dispatched);
        info!(
            analysis = self.kind.name(),
            backend = backend.name(),
            jobs = runners.len(),
            threads = self.pool.threads(),
            "dispatching sub-analyses"
        );
        self.context
            .update_message(&format!("Running {} analysis...", self.kind.name()));
        self.context.update_progress_indeterminate();

        let results: Vec<JobResult<K::Output>> =
            self.pool.install(|| runners.par_iter().map(|runner| runner.run()).collect());

        self.enter(OrchestratorState::Collecting);
        if self.is_cancelled() {
            return Ok(self.cancelled());
        }

        let mut aggregate = Aggregate::with_len(runners.len());
        for result in results {
            match result {
                JobResult::Success { index, value } => aggregate.insert(index, value),
                JobResult::Failure { index, error } => debug!(job = index, error = %error, "job failed"),
                JobResult::Cancelled { index } => debug!(job = index, "job cancelled"),
            }
        }
        if self.is_cancelled() {
            return Ok(self.cancelled());
        }

        self.enter(OrchestratorState::Completed);
        info!(
            populated = aggregate.populated(),
            missing = aggregate.len() - aggregate.populated(),
            "analysis completed"
        );
        Ok(Outcome::Completed(aggregate))
    }

    /// Validates the request and selects the backend that will serve it.
    fn prepare(&self, request: &AnalysisRequest) -> Result<Arc<dyn EngineBackend>, AnalysisError> {
        if request.inputs.is_empty() {
            return Err(AnalysisError::setup("the request has no inputs"));
        }
        self.kind.validate_inputs(&request.inputs)?;
        request
            .material
            .validate()
            .map_err(|e| AnalysisError::setup(format!("invalid material: {}", e)))?;

        let omission = request.omission;
        if omission.apply && !(omission.level.is_finite() && omission.level >= 0.0) {
            return Err(AnalysisError::setup(format!("invalid omission level {}", omission.level)));
        }
        if omission.is_active() && self.omission.is_none() {
            return Err(AnalysisError::setup("omission requested but no omission tool is configured"));
        }

        for input in &request.inputs {
            if !input.file.is_file() {
                return Err(AnalysisError::setup(format!(
                    "input file {} for {} does not exist",
                    input.file.display(),
                    input.label
                )));
            }
        }
        if !request.flight_file.is_file() {
            return Err(AnalysisError::setup(format!(
                "flight file {} does not exist",
                request.flight_file.display()
            )));
        }

        let working_directory = self.context.working_directory();
        fs::create_dir_all(working_directory).map_err(|e| {
            AnalysisError::setup(format!(
                "cannot create working directory {}: {}",
                working_directory.display(),
                e
            ))
        })?;

        self.backends
            .select(request.backend, request.capability(), self.context.as_ref())
    }

    /// Builds one runner per input and registers it for cancellation.
    ///
    /// A runner registered after `cancel()` has already run is cancelled here,
    /// before it can do any work.
    fn register_runners(
        &self,
        request: &AnalysisRequest,
        backend: &Arc<dyn EngineBackend>,
        material_file: Arc<PathBuf>,
    ) -> Vec<Arc<SubAnalysisRunner<K>>> {
        let flight_file = Arc::new(request.flight_file.clone());
        let capability = request.capability();

        let mut registered = self.runners.lock();
        request
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let job = JobDescriptor {
                    index,
                    label: input.label.clone(),
                    input_file: input.file.clone(),
                    flight_file: flight_file.clone(),
                    material_file: material_file.clone(),
                    validity: request.validity,
                    omission: request.omission,
                    capability,
                };
                let runner = Arc::new(SubAnalysisRunner::new(
                    job,
                    backend.clone(),
                    self.kind.clone(),
                    self.omission.clone(),
                    self.context.clone(),
                    self.keep_failed_outputs,
                ));
                if self.is_cancelled() {
                    runner.cancel();
                }
                registered.push(runner.clone());
                runner
            })
            .collect()
    }

    fn enter(&self, next: OrchestratorState) {
        let mut state = self.state.lock();
        debug!(from = ?*state, to = ?next, "orchestrator state change");
        *state = next;
    }

    fn cancelled(&self) -> Outcome<K::Output> {
        self.enter(OrchestratorState::Cancelled);
        self.context.update_message("Analysis cancelled.");
        Outcome::Cancelled
    }
}
