//! Response continuation queue (§4.6): while a handler is mid-command
//! (e.g. draining a literal), any server-initiated notification that would
//! otherwise interleave with its reply is held back and replayed, in
//! order, once the command finishes.

use pimd_wire::ResponseLine;

#[derive(Default)]
pub struct ResponseQueue {
    suspended: bool,
    pending: Vec<ResponseLine>,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter "a handler is on the stack" mode: untagged lines offered via
    /// [`Self::offer`] are queued instead of written immediately.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Leaves suspension and returns every line queued while suspended, in
    /// the order they were offered, for the caller to write out before the
    /// next command is read.
    pub fn resume(&mut self) -> Vec<ResponseLine> {
        self.suspended = false;
        std::mem::take(&mut self.pending)
    }

    /// Offers a line for immediate delivery. Returns `Some` when the
    /// caller should write it now; `None` means it was queued and will
    /// come back from a later [`Self::resume`].
    pub fn offer(&mut self, line: ResponseLine) -> Option<ResponseLine> {
        if self.suspended {
            self.pending.push(line);
            None
        } else {
            Some(line)
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_pass_through_when_not_suspended() {
        let mut queue = ResponseQueue::new();
        let line = ResponseLine::untagged("ItemChanged 1");
        assert!(queue.offer(line).is_some());
    }

    #[test]
    fn lines_queue_while_suspended_and_replay_in_order() {
        let mut queue = ResponseQueue::new();
        queue.suspend();
        assert!(queue.offer(ResponseLine::untagged("first")).is_none());
        assert!(queue.offer(ResponseLine::untagged("second")).is_none());
        let replayed = queue.resume();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].text, "first");
        assert_eq!(replayed[1].text, "second");
        assert!(!queue.is_suspended());
    }
}
