//! Session record persistence.

mod model;
mod repository;

pub use model::SessionRecordDb;
pub use repository::SessionRepository;
