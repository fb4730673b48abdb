//! A static verb-to-handler table for the connection handler's command
//! loop.
//!
//! The broker's verb set is fixed at compile time: there is no control
//! plane pushing new routes at runtime, and no object layer to bind
//! against. What survives from that shape is the registration pattern
//! itself — handlers are inserted once by verb, and dispatch is a single
//! table lookup rather than a chain of `if verb == ...` branches that
//! grows unreadable as verbs accumulate.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use pimd_wire::{CommandLine, Verb};

/// The future type every handler function returns: a boxed, `Send` future
/// borrowing its connection context for exactly the lifetime of one
/// dispatched command.
pub type BoxedHandlerFuture<'a, Resp, Err> = Pin<Box<dyn Future<Output = Result<Resp, Err>> + Send + 'a>>;

/// A handler function pointer. `#[pimd_macros::handler]` generates
/// functions of exactly this shape from a plain `async fn(ctx, cmd)`.
pub type HandlerFn<Ctx, Resp, Err> = for<'a> fn(&'a mut Ctx, CommandLine) -> BoxedHandlerFuture<'a, Resp, Err>;

/// A table mapping [`Verb`] to the handler registered for it.
///
/// Built once at process start and never mutated again; every connection
/// task dispatches against the same shared table, so looking up a
/// handler is a hash lookup and a direct call, never a lock.
pub struct VerbTable<Ctx, Resp, Err> {
    entries: HashMap<Verb, HandlerFn<Ctx, Resp, Err>>,
}

impl<Ctx, Resp, Err> VerbTable<Ctx, Resp, Err> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Registers `handler` for `verb`, returning `self` so a full table
    /// can be assembled as one chained expression at startup.
    pub fn register(mut self, verb: Verb, handler: HandlerFn<Ctx, Resp, Err>) -> Self {
        self.entries.insert(verb, handler);
        self
    }

    pub fn get(&self, verb: Verb) -> Option<HandlerFn<Ctx, Resp, Err>> {
        self.entries.get(&verb).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<Ctx, Resp, Err> Default for VerbTable<Ctx, Resp, Err> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counter(i64);

    fn echo_tag<'a>(ctx: &'a mut Counter, cmd: CommandLine) -> BoxedHandlerFuture<'a, i64, ()> {
        Box::pin(async move {
            ctx.0 += 1;
            Ok(cmd.tag.get())
        })
    }

    #[tokio::test]
    async fn registered_verb_dispatches_to_its_handler() {
        let table = VerbTable::new().register(Verb::Login, echo_tag);
        let mut ctx = Counter(0);
        let handler = table.get(Verb::Login).expect("LOGIN should be registered");
        let cmd = CommandLine {
            tag: pimd_core::RequestTag::new(9),
            verb: Verb::Login,
            args: json!({}),
        };
        let tag = handler(&mut ctx, cmd).await.unwrap();
        assert_eq!(tag, 9);
        assert_eq!(ctx.0, 1);
    }

    #[test]
    fn unregistered_verb_is_absent() {
        let table: VerbTable<Counter, i64, ()> = VerbTable::new();
        assert!(table.get(Verb::TransactionBegin).is_none());
    }
}
