//! Market-analysis history persistence.

mod model;
mod repository;

pub use model::AnalysisRecordDb;
pub use repository::AnalysisRepository;
