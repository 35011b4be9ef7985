pub mod heuristics;
pub mod prompts;
pub mod sections;
pub mod structured;
pub mod text;

pub use structured::{
    CvStructurer, HeuristicStructurer, LlmStructurer, ParsedCv, StructuringError,
    StructuringOutcome,
};
pub use text::{extract_text_blocking, CvFormat, ExtractError};
