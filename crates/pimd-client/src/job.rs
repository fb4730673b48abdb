//! A job (§3, §4.9): a tagged request with a parent session, optional
//! subjobs, an error slot and pre-result lifecycle points. A job's
//! lifetime ends at `result` emission; nothing in this crate holds a job
//! alive past that point (Design Notes §9 "arena of jobs owned by the
//! session").

use pimd_core::RequestTag;
use pimd_model::EntityId;
use pimd_wire::Verb;
use serde_json::Value;

use crate::error::ClientError;

pub type JobId = u64;

#[derive(Debug, Default)]
pub struct JobIdGenerator(std::sync::atomic::AtomicU64);

impl JobIdGenerator {
    pub const fn new() -> Self {
        Self(std::sync::atomic::AtomicU64::new(1))
    }

    pub fn next(&self) -> JobId {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Not yet sent to the broker.
    Queued,
    /// Sent and awaiting a tagged response, either as the session's
    /// current job or pipelined alongside it.
    Running,
    /// Done; kept only long enough to emit `result` and be dropped.
    Done,
}

/// Whether a killed job still emits `result` (§8 S3/S4 both expect it;
/// the extract's silent-kill path is folded in as the `Quiet` variant for
/// completeness since composite-job auto-kill of subjobs should not
/// double-emit through the parent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    EmitResult,
    Quiet,
}

/// An item mutation a job expects to apply against a specific revision;
/// used for §4.9's revision propagation between queued jobs.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedRevision {
    pub item_id: EntityId,
    pub revision: u32,
}

pub struct Job {
    pub id: JobId,
    pub parent: Option<JobId>,
    pub subjobs: Vec<JobId>,
    pub verb: Verb,
    pub args: Value,
    pub state: JobState,
    pub tag: Option<RequestTag>,
    /// Set once the broker has acknowledged the job's literal (if any)
    /// was fully written; gates pipelining the next queued job (§4.9
    /// `doStartNext`).
    pub write_finished: bool,
    pub error: Option<ClientError>,
    pub expected_revision: Option<ExpectedRevision>,
}

impl Job {
    pub fn new(id: JobId, verb: Verb, args: Value) -> Self {
        Self {
            id,
            parent: None,
            subjobs: Vec::new(),
            verb,
            args,
            state: JobState::Queued,
            tag: None,
            write_finished: false,
            error: None,
            expected_revision: None,
        }
    }

    pub fn with_expected_revision(mut self, item_id: EntityId, revision: u32) -> Self {
        self.expected_revision = Some(ExpectedRevision { item_id, revision });
        self
    }

    pub fn with_parent(mut self, parent: JobId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn fail(&mut self, error: ClientError) {
        self.state = JobState::Done;
        self.error = Some(error);
    }

    pub fn succeed(&mut self) {
        self.state = JobState::Done;
        self.error = None;
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }
}
