//! Post-commit notifications and background task dispatch.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::message::{AttachmentId, FoiAttachment, FoiMessage, MessageId};
use crate::request::FoiRequest;

/// Receives domain events after the database write succeeded.
///
/// Called synchronously and in order by the committer.
pub trait Notifier: Send + Sync {
    /// A new inbound message was committed to `request`.
    fn on_message_committed(&self, request: &FoiRequest, message: &FoiMessage);

    /// An attachment was stored for `message`.
    fn on_attachment_uploaded(&self, message: &FoiMessage, attachment: &FoiAttachment) {
        let _ = (message, attachment);
    }
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn on_message_committed(&self, request: &FoiRequest, message: &FoiMessage) {
        info!(
            request_id = %request.id,
            message_id = %message.id,
            sender = %message.sender_email,
            "message received"
        );
    }
}

/// Work handed to the background queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Convert an office document or image attachment to PDF.
    ConvertAttachment(AttachmentId),
    /// Poll the transport for the delivery state of an outbound message.
    CheckDeliveryStatus(MessageId),
}

/// Fire-and-forget task scheduling.
///
/// Failing to schedule never fails the caller.
pub trait TaskDispatcher: Send + Sync {
    /// Schedules `task` to run eventually.
    fn dispatch(&self, task: Task);
}

/// Dispatcher that forwards tasks to a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<Task>,
}

impl ChannelDispatcher {
    /// Creates a dispatcher and the receiving end of its queue.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskDispatcher for ChannelDispatcher {
    fn dispatch(&self, task: Task) {
        if self.sender.send(task).is_err() {
            warn!(?task, "task queue closed, dropping task");
        }
    }
}
