//! Per-connection handler state (§4.6): the pieces every verb handler
//! needs, bundled so `#[pimd_macros::handler]` functions stay a plain
//! `async fn(ctx: &mut HandlerContext, cmd: CommandLine)`.

use std::sync::Arc;

use pimd_core::ConnectionId;
use pimd_notify::TransactionCollector;
use pimd_storage::DataStore;

use crate::error::ServerError;
use crate::state::ConnectionState;
use crate::subscription::Subscription;

/// A part streamed in over a wire literal (§4.1, §4.7) rather than inline
/// JSON. The connection loop drains the literal before dispatch and stashes
/// it here; `ItemCreate`/`ItemModify` pick it up and fold it into the part
/// list alongside whatever came as inline JSON.
pub type PendingLiteral = (Arc<str>, Vec<u8>);

/// Everything a verb handler can touch: the shared storage engine, this
/// connection's state machine position, its open transaction (if any),
/// and its subscription filter.
pub struct HandlerContext {
    pub connection_id: ConnectionId,
    pub store: Arc<DataStore>,
    pub state: ConnectionState,
    pub subscription: Subscription,
    collector: Option<TransactionCollector>,
    /// `true` when the open collector was opened implicitly for a single
    /// command rather than by an explicit client `BEGIN` (§4.4 "every
    /// command is transactional; an explicit `BEGIN` only widens the
    /// scope"). [`Self::finish_command`] auto-commits it; an explicit
    /// transaction is left open across commands until `COMMIT`/`ROLLBACK`.
    auto_commit: bool,
    pub external_payload_threshold: u64,
    pending_literal: Option<PendingLiteral>,
}

impl HandlerContext {
    pub fn new(connection_id: ConnectionId, store: Arc<DataStore>, external_payload_threshold: u64) -> Self {
        Self {
            connection_id,
            store,
            state: ConnectionState::NonAuthenticated,
            subscription: Subscription::new(),
            collector: None,
            auto_commit: false,
            external_payload_threshold,
            pending_literal: None,
        }
    }

    /// Set by the connection loop right before dispatch when the command
    /// carried a literal; taken by the handler that consumes it.
    pub fn set_pending_literal(&mut self, literal: PendingLiteral) {
        self.pending_literal = Some(literal);
    }

    pub fn take_pending_literal(&mut self) -> Option<PendingLiteral> {
        self.pending_literal.take()
    }

    pub fn require_authenticated(&self) -> Result<(), ServerError> {
        match self.state {
            ConnectionState::NonAuthenticated | ConnectionState::LoggingOut => {
                Err(ServerError::WrongState { verb: "<authenticated verb>", state: self.state.label() })
            }
            _ => Ok(()),
        }
    }

    pub fn require_selected(&self) -> Result<pimd_model::EntityId, ServerError> {
        self.require_authenticated()?;
        self.state
            .selected_collection()
            .ok_or(ServerError::NoCollectionSelected)
    }

    /// Opens a transaction. §4.5: only one open at a time per connection;
    /// nested `BEGIN`s are a connection-handler error, not a storage one
    /// (the driver's own nesting counter is for a single transaction's
    /// internal bracketing, not for stacking independent client-visible
    /// transactions).
    pub fn begin_transaction(&mut self) -> Result<(), ServerError> {
        if self.collector.is_some() {
            return Err(ServerError::TransactionAlreadyOpen);
        }
        self.collector = Some(self.store.new_collector());
        self.auto_commit = false;
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> Result<(), ServerError> {
        if self.auto_commit {
            return Err(ServerError::NoTransaction);
        }
        let collector = self.collector.take().ok_or(ServerError::NoTransaction)?;
        collector.commit();
        Ok(())
    }

    pub fn rollback_transaction(&mut self) -> Result<(), ServerError> {
        if self.auto_commit {
            return Err(ServerError::NoTransaction);
        }
        let collector = self.collector.take().ok_or(ServerError::NoTransaction)?;
        collector.rollback();
        Ok(())
    }

    pub fn has_open_transaction(&self) -> bool {
        self.collector.is_some() && !self.auto_commit
    }

    /// Every CRUD handler's entry point into the notification pipeline: an
    /// explicit client transaction is reused as-is; absent one, a
    /// single-command collector is opened and marked for auto-commit by
    /// [`Self::finish_command`].
    pub fn collector_mut(&mut self) -> &mut TransactionCollector {
        if self.collector.is_none() {
            self.collector = Some(self.store.new_collector());
            self.auto_commit = true;
        }
        self.collector.as_mut().expect("just inserted")
    }

    /// Called by the connection loop after every dispatched command:
    /// commits (on `Ok`) or rolls back (on `Err`) a collector this command
    /// opened implicitly. A client-opened transaction is left untouched.
    pub fn finish_command(&mut self, command_succeeded: bool) {
        if !self.auto_commit {
            return;
        }
        if let Some(collector) = self.collector.take() {
            if command_succeeded {
                collector.commit();
            } else {
                collector.rollback();
            }
        }
        self.auto_commit = false;
    }
}
