//! Messages on a request timeline, with their tags, attachments and
//! problem reports.

mod model;
mod redaction;
mod repository;

pub use model::{
    AttachmentId, FoiAttachment, FoiMessage, MessageId, MessageKind, NewAttachment, NewMessage,
    ProblemKind, ProblemReport, ProblemReportId, tags,
};
pub use redaction::{EMAIL_PLACEHOLDER, NAME_PLACEHOLDER, Redactor};
pub use repository::MessageRepository;
