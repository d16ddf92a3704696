#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod exam;
pub mod notify;
pub mod sweep;

pub use course_core::Clock;

pub use engine::{Applied, EngineOutcome, FailedDelivery, IgnoreReason, ProgressionEngine};
pub use error::{EngineError, NotifyError, SweepError};
pub use notify::{
    BotApiConfig, BotApiGateway, NotificationGateway, RecordingGateway, SentNotification,
};
pub use sweep::{SweepConfig, SweepReport, SweepScheduler};
