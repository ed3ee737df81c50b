//! # testgrid-events
//!
//! Execution event types flowing from active environments to the
//! orchestrator's test storage.
//!
//! Every active environment owns one outbound unbounded channel of
//! [`EnvironmentEvent`]s; the storage component is the single consumer per
//! environment and aggregates across channels. Senders swallow delivery
//! failures: a closed receiver means the tracked test entry was already
//! removed, and a broken environment must never propagate errors back into
//! the bookkeeping of its siblings.

mod types;

pub use types::{
    event_channel, CompletionNotifier, EnvironmentEvent, EnvironmentEventKind, EventSender,
    TestCompletion,
};

// The aggregate verdict lives with the report tree; re-exported here because
// completion events carry it.
pub use testgrid_report::TestExecutionResult;
