pub mod analysis;
pub mod openai;
pub mod policy;
pub mod prompt;
pub mod recording;
pub mod signature;

pub use analysis::{AnalysisResult, ChangedFile, InlineComment, ReviewAnalyzer};
pub use openai::OpenAiAnalyzer;
pub use policy::{FileFilter, Policy};
pub use recording::{
    CorrelationId, Direction, EventType, RecordedEvent, RecordingLogger, RecordingMiddleware,
    Sanitizer, ServiceType, CORRELATION_ID_HEADER,
};
