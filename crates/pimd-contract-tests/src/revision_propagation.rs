//! Testable Property 8 (spec §8): for any sequence of
//! `propagate_item_revision(item_id, r)` calls against a not-yet-started
//! job's expected revision for `item_id`, the job's final expected
//! revision equals the maximum `r` seen, regardless of call order (§8
//! scenario S8 — "revision propagation is a forward-only ratchet").

use pimd_client::{Job, Session, DEFAULT_PIPELINE_CAPACITY};
use pimd_wire::{Verb, PROTOCOL_VERSION};
use serde_json::json;

use crate::support::{TckCase, TckSuite};

fn connected_session() -> Session {
    let mut session = Session::new(DEFAULT_PIPELINE_CAPACITY);
    session.set_negotiated_protocol_version(PROTOCOL_VERSION);
    session.note_connected();
    session
}

fn job(id: u64) -> Job {
    Job::new(id, Verb::ItemFetch, json!({}))
}

fn expected_revision_of(session: &Session, job_id: u64) -> Option<u32> {
    session.find(job_id).and_then(|job| job.expected_revision).map(|e| e.revision)
}

fn a_higher_then_lower_revision_leaves_the_higher_one_in_place() {
    let mut session = connected_session();
    // Keep a job running so the one carrying the expected revision stays
    // queued, not started, for the whole test.
    session.add_job(job(1));
    session.add_job(job(2).with_expected_revision(42, 1));

    session.propagate_item_revision(42, 5);
    session.propagate_item_revision(42, 3);

    assert_eq!(expected_revision_of(&session, 2), Some(5), "a lower revision arriving after a higher one must not move the ratchet backward");
}

fn monotonically_increasing_revisions_each_advance_the_ratchet() {
    let mut session = connected_session();
    session.add_job(job(1));
    session.add_job(job(2).with_expected_revision(7, 0));

    for revision in [1, 2, 3, 10] {
        session.propagate_item_revision(7, revision);
        assert_eq!(expected_revision_of(&session, 2), Some(revision));
    }
}

fn propagation_only_touches_the_matching_item_id() {
    let mut session = connected_session();
    session.add_job(job(1));
    session.add_job(job(2).with_expected_revision(1, 0));
    session.add_job(job(3).with_expected_revision(2, 0));

    session.propagate_item_revision(1, 9);

    assert_eq!(expected_revision_of(&session, 2), Some(9));
    assert_eq!(expected_revision_of(&session, 3), Some(0), "propagation for one item id must not touch a job tracking a different item");
}

fn propagation_reaches_jobs_in_both_the_queue_and_the_pipeline() {
    let mut session = connected_session();
    // Fill the pipeline so later jobs sit in the queue, then confirm a
    // propagation call reaches an expected-revision job wherever it
    // currently lives (pipeline or queue).
    session.add_job(job(1));
    session.add_job(job(2));
    session.add_job(job(3).with_expected_revision(100, 1));

    assert!(session.pipeline_len() + session.queue_len() >= 1, "at least one job must still be unresolved to host the expected revision");
    session.propagate_item_revision(100, 4);
    assert_eq!(expected_revision_of(&session, 3), Some(4));
}

const CASES: &[TckCase] = &[
    TckCase {
        name: "a_higher_then_lower_revision_leaves_the_higher_one_in_place",
        test: a_higher_then_lower_revision_leaves_the_higher_one_in_place,
    },
    TckCase {
        name: "monotonically_increasing_revisions_each_advance_the_ratchet",
        test: monotonically_increasing_revisions_each_advance_the_ratchet,
    },
    TckCase {
        name: "propagation_only_touches_the_matching_item_id",
        test: propagation_only_touches_the_matching_item_id,
    },
    TckCase {
        name: "propagation_reaches_jobs_in_both_the_queue_and_the_pipeline",
        test: propagation_reaches_jobs_in_both_the_queue_and_the_pipeline,
    },
];

static SUITE: TckSuite = TckSuite {
    name: "revision_propagation",
    cases: CASES,
};

pub fn suite() -> &'static TckSuite {
    &SUITE
}
