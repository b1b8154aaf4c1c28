//! Signature-verified GitHub webhook intake for Rook.
//!
//! Deliveries are translated into `WorkflowEvent`s and handed to an
//! `EventSink` (normally the bounded `WorkflowDispatcher`), so the HTTP
//! response never waits on the workflow itself.

mod events;
mod server;
mod signature;

pub use events::{classify_delivery, WebhookDelivery};
pub use server::{run_webhook_server, EventSink, WebhookServerConfig, HEALTH_ENDPOINT, WEBHOOK_ENDPOINT};
pub use signature::verify_github_sha256_signature;
