use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::app::App;
use crate::app_list::AppList;
use crate::cancel::Cancellable;
use crate::category::Category;
use crate::error::{JobError, PluginFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Dispatching,
    Running,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "created",
            JobState::Dispatching => "dispatching",
            JobState::Running => "running",
            JobState::Merging => "merging",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What a completed job produced, depending on its action.
#[derive(Debug, Clone)]
pub enum JobOutput {
    Apps(Arc<AppList>),
    Categories(Vec<Category>),
    App(Arc<App>),
    Success,
}

impl JobOutput {
    pub fn apps(&self) -> Option<&AppList> {
        match self {
            JobOutput::Apps(list) => Some(list),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub output: JobOutput,
    /// Plugin failures tolerated under the continue policy.
    pub warnings: Vec<PluginFailure>,
}

pub(crate) struct JobStatus {
    state: Mutex<JobState>,
    result: Mutex<Option<Result<JobResult, JobError>>>,
    done: Condvar,
}

impl JobStatus {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(JobState::Created),
            result: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    pub(crate) fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        let mut current = self.state.lock();
        if !current.is_terminal() {
            *current = state;
        }
    }

    pub(crate) fn finish(&self, result: Result<JobResult, JobError>) {
        let terminal = match &result {
            Ok(_) => JobState::Completed,
            Err(JobError::Cancelled) => JobState::Cancelled,
            Err(_) => JobState::Failed,
        };
        self.set_state(terminal);
        *self.result.lock() = Some(result);
        self.done.notify_all();
    }
}

/// Caller side of a submitted job.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    cancellable: Cancellable,
    status: Arc<JobStatus>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, cancellable: Cancellable, status: Arc<JobStatus>) -> Self {
        Self {
            id,
            cancellable,
            status,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    /// Request cancellation. Has no effect once the job has finished.
    pub fn cancel(&self) {
        self.cancellable.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.status.result.lock().is_some()
    }

    /// Block until the job finishes.
    pub fn wait(&self) -> Result<JobResult, JobError> {
        let mut result = self.status.result.lock();
        while result.is_none() {
            self.status.done.wait(&mut result);
        }
        result.clone().unwrap_or(Err(JobError::Cancelled))
    }

    /// Block for at most `timeout`; `None` if the job is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<JobResult, JobError>> {
        let deadline = Instant::now() + timeout;
        let mut result = self.status.result.lock();
        while result.is_none() {
            if self.status.done.wait_until(&mut result, deadline).timed_out() {
                break;
            }
        }
        result.clone()
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
