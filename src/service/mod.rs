//! Service layer
//!
//! Business logic separated from HTTP handlers: the reconciled feed and
//! the cross-platform dispatchers.

mod dispatch;
mod timeline;

pub use dispatch::{ComposeRequest, DispatchReport, Dispatcher, PlatformOutcome, ReplyTo, Targets};
pub use timeline::{LogicalPost, LogicalPostView, MatchPolicy, PlatformIds, TimelineService, reconcile};
