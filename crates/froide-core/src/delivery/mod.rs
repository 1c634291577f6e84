//! Inbound delivery: routing a parsed mail to requests and committing it.

mod attachments;
mod committer;
mod notify;
mod policy;
mod router;

pub use attachments::{AttachmentNamer, is_convertible};
pub use committer::{CommitOutcome, Committer};
pub use notify::{ChannelDispatcher, Notifier, Task, TaskDispatcher, TracingNotifier};
pub use policy::{ContentPolicy, HidePredicate};
pub use router::{DropReason, RouteDecision, RoutePlan, Router, RoutingOutcome};
