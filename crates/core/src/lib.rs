#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod model;
pub mod policy;
pub mod progression;
pub mod time;

pub use catalog::{CatalogError, Lesson, LessonCatalog};
pub use error::Error;
pub use policy::ProgressionPolicy;
pub use progression::{CorrectOutcome, DueKind, ExamProgress};
pub use time::Clock;
