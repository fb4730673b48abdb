//! Client session (§4.9, C9): a tagged request pipeline over one socket.
//! Owns the not-yet-started queue, the in-flight pipeline, the current
//! job, the monotonic tag counter and reconnect bookkeeping.
//!
//! Modeled the way [`pimd_sync::ItemSynchronizer`](../pimd_sync/struct.ItemSynchronizer.html)
//! models its delivery state machine: every transition is an explicit
//! method call driven by the caller (the real socket I/O, a `writeFinished`
//! acknowledgement, a tagged response), never a callback invoked back into
//! this module from inside one of its own methods. That sidesteps the
//! extract's event-loop reentrancy (Design Notes §9).

use std::collections::VecDeque;

use pimd_core::{RequestTag, TagGenerator};
use pimd_model::EntityId;
use pimd_wire::PROTOCOL_VERSION;

use crate::error::ClientError;
use crate::events::Publisher;
use crate::job::{Job, JobId, JobState, KillMode};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    JobAdded(JobId),
    AboutToStart(JobId),
    WriteFinished(JobId),
    Result(JobId, Option<ClientError>),
    LostConnection(JobId),
    Reconnected,
}

/// Default pipeline capacity (§4.9 "default N=2"), mirrored in
/// [`pimd_core::ClientConnectionConfig::pipeline_depth`].
pub const DEFAULT_PIPELINE_CAPACITY: usize = 2;

pub struct Session {
    queue: VecDeque<Job>,
    pipeline: VecDeque<Job>,
    current: Option<Job>,
    pipeline_capacity: usize,
    tags: TagGenerator,
    connected: bool,
    negotiated_protocol_version: Option<u32>,
    reconnect_count: u32,
    pub events: Publisher<SessionEvent>,
}

impl Session {
    pub fn new(pipeline_capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            pipeline: VecDeque::new(),
            current: None,
            pipeline_capacity,
            tags: TagGenerator::new(),
            connected: false,
            negotiated_protocol_version: None,
            reconnect_count: 0,
            events: Publisher::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pipeline_len(&self) -> usize {
        self.pipeline.len()
    }

    pub fn current_job_id(&self) -> Option<JobId> {
        self.current.as_ref().map(|job| job.id)
    }

    /// Called once the greeting's negotiated version is known (§6.1). Must
    /// be set before the first job is started.
    pub fn set_negotiated_protocol_version(&mut self, version: u32) {
        self.negotiated_protocol_version = Some(version);
    }

    pub fn note_connected(&mut self) {
        self.connected = true;
        self.reconnect_count += 1;
        self.events.emit(SessionEvent::Reconnected);
    }

    pub fn note_disconnected(&mut self) {
        self.connected = false;
        if let Some(job) = &self.current {
            self.events.emit(SessionEvent::LostConnection(job.id));
        }
    }

    /// Appends a job to the queue and attempts to start it (§4.9 "adding a
    /// job"). In the extract this is scheduled onto the next event-loop
    /// turn so a burst of additions coalesces; here the caller decides
    /// when to call [`Self::start_next`], so both shapes are expressible.
    pub fn add_job(&mut self, job: Job) -> JobId {
        let id = job.id;
        self.queue.push_back(job);
        self.events.emit(SessionEvent::JobAdded(id));
        self.start_next();
        id
    }

    /// §4.9 `doStartNext`.
    pub fn start_next(&mut self) {
        if !self.connected {
            return;
        }

        let current_write_finished = self.current.as_ref().is_some_and(|job| job.write_finished);
        if current_write_finished && self.pipeline.len() < self.pipeline_capacity {
            if let Some(job) = self.queue.pop_front() {
                self.start(job, true);
                return;
            }
        }

        if self.current.is_none() {
            let next = self.pipeline.pop_front().or_else(|| self.queue.pop_front());
            if let Some(job) = next {
                self.start(job, false);
            }
        }
    }

    fn start(&mut self, mut job: Job, pipelined: bool) {
        if let Some(negotiated) = self.negotiated_protocol_version {
            if negotiated != PROTOCOL_VERSION {
                job.fail(ClientError::ProtocolVersionMismatch);
                let id = job.id;
                let error = job.error.clone();
                self.events.emit(SessionEvent::Result(id, error));
                self.start_next();
                return;
            }
        }

        job.tag = Some(self.tags.next());
        job.state = JobState::Running;
        let id = job.id;
        if pipelined {
            self.pipeline.push_back(job);
        } else {
            self.current = Some(job);
        }
        self.events.emit(SessionEvent::AboutToStart(id));
    }

    pub fn next_tag(&self) -> RequestTag {
        self.tags.next()
    }

    pub fn job_write_finished(&mut self, id: JobId) {
        if let Some(job) = self.current.as_mut().filter(|job| job.id == id) {
            job.write_finished = true;
            self.events.emit(SessionEvent::WriteFinished(id));
            self.start_next();
            return;
        }
        if let Some(job) = self.pipeline.iter_mut().find(|job| job.id == id) {
            job.write_finished = true;
            self.events.emit(SessionEvent::WriteFinished(id));
        }
    }

    /// §4.9 `jobDone`: a tagged response arrived for `id`.
    pub fn job_done(&mut self, id: JobId, error: Option<ClientError>) {
        if self.current.as_ref().is_some_and(|job| job.id == id) {
            let mut job = self.current.take().expect("just matched");
            self.finish(&mut job, error);
            self.current = self.pipeline.pop_front();
            self.start_next();
            return;
        }
        if let Some(pos) = self.pipeline.iter().position(|job| job.id == id) {
            let mut job = self.pipeline.remove(pos).expect("position just found");
            self.finish(&mut job, error);
            return;
        }
        if let Some(pos) = self.queue.iter().position(|job| job.id == id) {
            let mut job = self.queue.remove(pos).expect("position just found");
            self.finish(&mut job, error);
        }
    }

    fn finish(&mut self, job: &mut Job, error: Option<ClientError>) {
        match &error {
            Some(err) => job.fail(err.clone()),
            None => job.succeed(),
        }
        self.events.emit(SessionEvent::Result(job.id, error));
    }

    /// Kills one job, propagating to its subjobs first (§3 "composite jobs
    /// propagate kill to all subjobs"). Killing the current job forces a
    /// reconnect (§8 S4); killing a queued or pipelined job does not (§8
    /// S3).
    pub fn kill(&mut self, id: JobId, mode: KillMode) {
        let subjobs = self.find(id).map(|job| job.subjobs.clone()).unwrap_or_default();
        for sub in subjobs {
            self.kill(sub, mode);
        }

        if let Some(pos) = self.queue.iter().position(|job| job.id == id) {
            let mut job = self.queue.remove(pos).expect("position just found");
            self.finish_killed(&mut job, mode);
            return;
        }
        if let Some(pos) = self.pipeline.iter().position(|job| job.id == id) {
            let mut job = self.pipeline.remove(pos).expect("position just found");
            self.finish_killed(&mut job, mode);
            return;
        }
        if self.current.as_ref().is_some_and(|job| job.id == id) {
            let mut job = self.current.take().expect("just matched");
            self.finish_killed(&mut job, mode);
            self.reconnect();
            self.current = self.pipeline.pop_front();
            self.start_next();
        }
    }

    fn finish_killed(&mut self, job: &mut Job, mode: KillMode) {
        job.fail(ClientError::UserCanceled);
        if mode == KillMode::EmitResult {
            self.events.emit(SessionEvent::Result(job.id, job.error.clone()));
        }
    }

    /// Looks up a job by id across the queue, pipeline and current slot,
    /// in that order.
    pub fn find(&self, id: JobId) -> Option<&Job> {
        self.queue
            .iter()
            .chain(self.pipeline.iter())
            .chain(self.current.iter())
            .find(|job| job.id == id)
    }

    /// §4.9 `clear()`: cancels every queued and pipelined job, then the
    /// current job, then forces a reconnect (§8 S2).
    pub fn clear(&mut self) {
        while let Some(mut job) = self.queue.pop_front() {
            self.finish_killed(&mut job, KillMode::EmitResult);
        }
        while let Some(mut job) = self.pipeline.pop_front() {
            self.finish_killed(&mut job, KillMode::EmitResult);
        }
        if let Some(mut job) = self.current.take() {
            self.finish_killed(&mut job, KillMode::EmitResult);
        }
        self.reconnect();
    }

    fn reconnect(&mut self) {
        self.connected = false;
        self.note_connected();
    }

    /// §4.9 "revision propagation": walks every not-yet-started job and
    /// bumps its expected revision for `item_id` forward, never backward.
    pub fn propagate_item_revision(&mut self, item_id: EntityId, new_revision: u32) {
        for job in self.queue.iter_mut().chain(self.pipeline.iter_mut()) {
            if let Some(expected) = &mut job.expected_revision {
                if expected.item_id == item_id && new_revision > expected.revision {
                    expected.revision = new_revision;
                }
            }
        }
    }
}

/// Lazily-created, thread-affined default session (§4.9 "a thread-local
/// Session is created lazily, identified by application name + a random
/// suffix"). Sessions are not `Send`-shared on purpose (§5: a session is
/// affined to one thread for the duration of its jobs).
pub fn default_session_name(app_name: &str) -> String {
    let suffix: u32 = rand::random();
    format!("{app_name}-{suffix:08x}")
}

thread_local! {
    static DEFAULT_SESSION: std::cell::RefCell<Option<(String, std::rc::Rc<std::cell::RefCell<Session>>)>> =
        const { std::cell::RefCell::new(None) };
}

/// Returns this thread's default session, creating it on first use.
pub fn default_session(app_name: &str) -> std::rc::Rc<std::cell::RefCell<Session>> {
    DEFAULT_SESSION.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let name = default_session_name(app_name);
            tracing::info!(session = %name, "creating default session");
            *slot = Some((name, std::rc::Rc::new(std::cell::RefCell::new(Session::new(DEFAULT_PIPELINE_CAPACITY)))));
        }
        std::rc::Rc::clone(&slot.as_ref().expect("just inserted").1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pimd_wire::Verb;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn job(id: JobId) -> Job {
        Job::new(id, Verb::ItemFetch, json!({}))
    }

    fn connected_session() -> Session {
        let mut session = Session::new(DEFAULT_PIPELINE_CAPACITY);
        session.set_negotiated_protocol_version(PROTOCOL_VERSION);
        session.note_connected();
        session
    }

    #[test]
    fn queue_and_run_two_jobs_sequentially() {
        let mut session = connected_session();
        let started: Rc<RefCell<Vec<JobId>>> = Rc::new(RefCell::new(Vec::new()));
        let results: Rc<RefCell<Vec<JobId>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let started = Rc::clone(&started);
            let results = Rc::clone(&results);
            session.events.subscribe(move |event| match event {
                SessionEvent::AboutToStart(id) => started.borrow_mut().push(*id),
                SessionEvent::Result(id, _) => results.borrow_mut().push(*id),
                _ => {}
            });
        }

        session.add_job(job(1));
        session.add_job(job(2));
        assert_eq!(started.borrow().as_slice(), &[1]);
        assert!(results.borrow().is_empty());

        session.job_done(1, None);
        assert_eq!(started.borrow().as_slice(), &[1, 2]);
        assert_eq!(results.borrow().as_slice(), &[1]);

        session.job_done(2, None);
        assert_eq!(results.borrow().as_slice(), &[1, 2]);
    }

    #[test]
    fn clear_cancels_every_job_and_reconnects_twice() {
        let mut session = Session::new(DEFAULT_PIPELINE_CAPACITY);
        session.set_negotiated_protocol_version(PROTOCOL_VERSION);

        let results: Rc<RefCell<Vec<(JobId, bool)>>> = Rc::new(RefCell::new(Vec::new()));
        let reconnects = Rc::new(std::cell::Cell::new(0u32));
        {
            let results = Rc::clone(&results);
            let reconnects = Rc::clone(&reconnects);
            session.events.subscribe(move |event| match event {
                SessionEvent::Result(id, err) => results.borrow_mut().push((*id, err.is_some())),
                SessionEvent::Reconnected => reconnects.set(reconnects.get() + 1),
                _ => {}
            });
        }

        // First reconnect: the initial connect, observed because the
        // listener above is already subscribed.
        session.note_connected();

        for id in 1..=4 {
            session.add_job(job(id));
        }
        session.clear();

        let collected = results.borrow();
        assert_eq!(collected.len(), 4);
        assert!(collected.iter().all(|(_, failed)| *failed));
        assert_eq!(reconnects.get(), 2);
    }

    #[test]
    fn killing_a_queued_job_does_not_touch_the_running_one() {
        let mut session = connected_session();
        session.add_job(job(1));
        session.add_job(job(2));
        assert_eq!(session.current_job_id(), Some(1));

        let results: Rc<RefCell<Vec<JobId>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let results = Rc::clone(&results);
            session.events.subscribe(move |event| {
                if let SessionEvent::Result(id, _) = event {
                    results.borrow_mut().push(*id);
                }
            });
        }

        session.kill(2, KillMode::EmitResult);
        assert_eq!(results.borrow().as_slice(), &[2]);
        assert_eq!(session.current_job_id(), Some(1));
        assert_eq!(session.reconnect_count(), 1);
    }

    #[test]
    fn killing_the_running_job_forces_a_reconnect_and_promotes_the_next() {
        let mut session = connected_session();
        session.add_job(job(1));
        session.add_job(job(2));
        let before = session.reconnect_count();

        session.kill(1, KillMode::EmitResult);
        assert_eq!(session.reconnect_count(), before + 1);
        assert_eq!(session.current_job_id(), Some(2));
    }

    #[test]
    fn protocol_mismatch_fails_the_job_without_starting_it() {
        let mut session = Session::new(DEFAULT_PIPELINE_CAPACITY);
        session.set_negotiated_protocol_version(PROTOCOL_VERSION + 1);
        session.note_connected();

        let results: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let results = Rc::clone(&results);
            session.events.subscribe(move |event| {
                if let SessionEvent::Result(_, err) = event {
                    results.borrow_mut().push(matches!(err, Some(ClientError::ProtocolVersionMismatch)));
                }
            });
        }

        session.add_job(job(1));
        assert_eq!(results.borrow().as_slice(), &[true]);
        assert!(session.current_job_id().is_none());
    }

    #[test]
    fn revision_propagation_only_moves_forward() {
        let mut session = connected_session();
        let waiting = job(2).with_expected_revision(42, 1);
        session.add_job(job(1));
        session.add_job(waiting);

        session.propagate_item_revision(42, 5);
        session.propagate_item_revision(42, 3);

        let queued = session.queue.front().expect("job 2 still queued");
        assert_eq!(queued.expected_revision.unwrap().revision, 5);
    }
}
