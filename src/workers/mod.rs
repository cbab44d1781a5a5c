mod consumer;
mod executor;
mod extractor;
mod pdf;
mod reconciler;

pub use consumer::WorkerPool;
pub use executor::CommandExecutor;
pub use extractor::{Extractor, ExtractorRegistry, JsonExtractor, ProcessingError, TextExtractor};
pub use pdf::PdfExtractor;
pub use reconciler::Reconciler;

use std::path::PathBuf;
use std::time::Duration;

/// Registry with the stock extraction collaborators.
pub fn default_registry(command_timeout: Duration, temp_dir: PathBuf) -> ExtractorRegistry {
    ExtractorRegistry::with(vec![
        Box::new(TextExtractor::new()),
        Box::new(JsonExtractor::new()),
        Box::new(PdfExtractor::new(
            CommandExecutor::new(command_timeout),
            temp_dir,
        )),
    ])
}
