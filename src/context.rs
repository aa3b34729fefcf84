//! The host task an analysis reports to.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Host-side collaborator of an analysis.
///
/// The host owns the working directory, receives one-way progress
/// notifications and collects warnings for failures that were absorbed
/// instead of aborting the request.
pub trait TaskContext: Send + Sync {
    /// Private working directory shared by every job of the request.
    fn working_directory(&self) -> &Path;

    fn update_message(&self, message: &str);

    /// Signals progress that cannot be expressed as a fraction.
    fn update_progress_indeterminate(&self);

    fn add_warning(&self, warning: String);
}

/// A [`TaskContext`] that logs through `tracing` and keeps warnings in memory.
#[derive(Debug)]
pub struct RecordingContext {
    working_directory: PathBuf,
    messages: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingContext {
    pub fn new<P: Into<PathBuf>>(working_directory: P) -> Self {
        RecordingContext {
            working_directory: working_directory.into(),
            messages: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl TaskContext for RecordingContext {
    fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    fn update_message(&self, message: &str) {
        info!("{}", message);
        self.messages.lock().push(message.to_owned());
    }

    fn update_progress_indeterminate(&self) {}

    fn add_warning(&self, warning: String) {
        warn!("{}", warning);
        self.warnings.lock().push(warning);
    }
}
