mod document;
mod event;

pub use document::{Document, DocumentStatus, ExtractionMetadata};
pub use event::ProcessingEvent;
