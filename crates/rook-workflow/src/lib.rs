//! Issue-resolution workflow for Rook.
//!
//! `IssueAgent` is the per-issue state machine. `IssuePoller` and the webhook
//! `WorkflowDispatcher` are two event sources feeding it, serialized per issue
//! through a shared `IssueLocks` registry.

pub mod agent;
pub mod change_set;
pub mod dispatch;
pub mod heuristics;
pub mod poller;
pub mod prompts;
pub mod retry;
#[cfg(test)]
mod test_support;

pub use agent::{
    IssueAgent, IssueAgentSettings, WorkflowOutcome, DEFAULT_BRANCH_PREFIX, DEFAULT_MAX_TOKENS,
    DEFAULT_MODEL,
};
pub use change_set::{parse_change_set, ChangeSet, ChangeSetDialect};
pub use dispatch::{
    DispatchError, IssueGuard, IssueKey, IssueLocks, WorkflowDispatcher, WorkflowEvent,
};
pub use heuristics::ReplyClassifier;
pub use poller::{IssuePoller, PollCycleReport, PollerConfig};
pub use retry::{CodegenRetryPolicy, Sleeper, TokioSleeper};
