pub mod annotator;
pub mod currency;
pub mod grouper;
pub mod hooks;
pub mod indexer;
pub mod pipeline;
pub mod reconciler;
pub mod scanner;
pub mod splitter;

pub use annotator::Annotator;
pub use hooks::{CancelFlag, NoopHooks, ProgressSnapshot, RunHooks, TracingHooks};
pub use pipeline::{Pipeline, RunRequest};
pub use reconciler::Reconciler;
pub use scanner::{BarcodeReader, PageSession, TextLayerReader};
pub use splitter::Splitter;
