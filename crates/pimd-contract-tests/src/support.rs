//! Small harness shared by every suite: a named test case, a named group
//! of cases, and a runner that re-panics with suite/case context so a
//! failure reads like `[pipeline_bound::pipeline_never_exceeds_bound]
//! ...` instead of a bare assertion message.

use std::panic;

#[derive(Clone, Copy)]
pub struct TckCase {
    pub name: &'static str,
    pub test: fn(),
}

#[derive(Clone, Copy)]
pub struct TckSuite {
    pub name: &'static str,
    pub cases: &'static [TckCase],
}

pub fn run_suite(suite: &TckSuite) {
    assert!(!suite.cases.is_empty(), "a TCK suite must not be empty");
    for case in suite.cases {
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| (case.test)()));
        if let Err(payload) = outcome {
            panic_with_context(suite.name, case.name, payload);
        }
    }
}

fn panic_with_context(suite: &str, case: &str, payload: Box<dyn std::any::Any + Send>) -> ! {
    let text = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_string());
    panic::resume_unwind(Box::new(format!("[{suite}::{case}] {text}")));
}

/// Runs an `async` block to completion on a fresh current-thread runtime,
/// for suites whose case bodies need `pimd-query`/`pimd-storage`'s async
/// APIs but whose case signature (`fn()`) must stay synchronous so it can
/// sit in a `'static` `TckCase` array.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build a current-thread runtime for a contract-test case")
        .block_on(future)
}
