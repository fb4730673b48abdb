//! Typed publisher (Design Notes §9: replaces signal/slot and MOC-based
//! dynamic dispatch). A [`Publisher<E>`] holds one `Vec` of listener
//! closures per event payload type; [`Session`](crate::session::Session)
//! and [`Monitor`](crate::monitor::Monitor) each own one, keyed by their
//! own event enum.
//!
//! Listener count is tracked so a monitor can short-circuit "lazy
//! ignored" notifications (§4.10 step 1) without building the payload a
//! signal with zero listeners would just discard.

/// A registered listener. Boxed so a publisher can hold a heterogeneous
/// set of closures without knowing their capture state.
type Listener<E> = Box<dyn FnMut(&E) + Send>;

pub struct Publisher<E> {
    listeners: Vec<Listener<E>>,
}

impl<E> Default for Publisher<E> {
    fn default() -> Self {
        Self { listeners: Vec::new() }
    }
}

impl<E> Publisher<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&E) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    pub fn emit(&mut self, event: E) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn emits_to_every_subscriber() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut publisher: Publisher<u32> = Publisher::new();
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            publisher.subscribe(move |_| {
                calls.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(publisher.listener_count(), 3);
        publisher.emit(7);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn no_listeners_means_no_work_but_no_panic() {
        let mut publisher: Publisher<u32> = Publisher::new();
        assert!(!publisher.has_listeners());
        publisher.emit(1);
    }
}
