//! Testable Property 2 (spec §8): at any instant, `(current job +
//! pipeline length) <= 1 + PipelineSize` (default `PipelineSize = 2`),
//! under arbitrary enqueue/cancel interleavings.

use pimd_client::{Job, KillMode, Session, DEFAULT_PIPELINE_CAPACITY};
use pimd_wire::{Verb, PROTOCOL_VERSION};
use serde_json::json;

use crate::support::{TckCase, TckSuite};

fn in_flight(session: &Session) -> usize {
    session.current_job_id().is_some() as usize + session.pipeline_len()
}

fn connected_session() -> Session {
    let mut session = Session::new(DEFAULT_PIPELINE_CAPACITY);
    session.set_negotiated_protocol_version(PROTOCOL_VERSION);
    session.note_connected();
    session
}

fn job(id: u64) -> Job {
    Job::new(id, Verb::ItemFetch, json!({}))
}

fn pipeline_bound_holds_while_enqueuing_past_capacity() {
    let mut session = connected_session();
    for id in 1..=10 {
        session.add_job(job(id));
        assert!(
            in_flight(&session) <= 1 + DEFAULT_PIPELINE_CAPACITY,
            "in-flight count {} exceeded bound 1 + {}",
            in_flight(&session),
            DEFAULT_PIPELINE_CAPACITY
        );
    }
}

fn pipeline_bound_holds_across_interleaved_completions_and_cancels() {
    let mut session = connected_session();
    for id in 1..=6 {
        session.add_job(job(id));
    }
    assert!(in_flight(&session) <= 1 + DEFAULT_PIPELINE_CAPACITY);

    // Mark the current job's write as finished so a pipelined job is
    // allowed to start alongside it, then interleave a completion and a
    // cancellation of a still-queued job.
    let current = session.current_job_id().expect("a job should be current");
    session.job_write_finished(current);
    assert!(
        in_flight(&session) <= 1 + DEFAULT_PIPELINE_CAPACITY,
        "pipelining past capacity after write_finished"
    );

    session.job_done(current, None);
    assert!(in_flight(&session) <= 1 + DEFAULT_PIPELINE_CAPACITY);

    session.kill(5, KillMode::EmitResult);
    assert!(
        in_flight(&session) <= 1 + DEFAULT_PIPELINE_CAPACITY,
        "bound violated after killing a queued job"
    );
}

fn clearing_the_session_never_leaves_the_bound_violated() {
    let mut session = connected_session();
    for id in 1..=8 {
        session.add_job(job(id));
    }
    session.clear();
    assert_eq!(in_flight(&session), 0, "clear() should leave nothing in flight once reconnected");
}

const CASES: &[TckCase] = &[
    TckCase {
        name: "pipeline_bound_holds_while_enqueuing_past_capacity",
        test: pipeline_bound_holds_while_enqueuing_past_capacity,
    },
    TckCase {
        name: "pipeline_bound_holds_across_interleaved_completions_and_cancels",
        test: pipeline_bound_holds_across_interleaved_completions_and_cancels,
    },
    TckCase {
        name: "clearing_the_session_never_leaves_the_bound_violated",
        test: clearing_the_session_never_leaves_the_bound_violated,
    },
];

static SUITE: TckSuite = TckSuite {
    name: "pipeline_bound",
    cases: CASES,
};

pub fn suite() -> &'static TckSuite {
    &SUITE
}
