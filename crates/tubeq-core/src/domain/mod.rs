//! Domain model (ids, messages, options, errors, stats).

pub mod errors;
pub mod ids;
pub mod message;
pub mod options;
pub mod stats;
pub mod tube_name;

pub use self::errors::QueueError;
pub use self::ids::{LeaseId, MessageId, ParseIdError};
pub use self::message::{Message, MessageState, Payload};
pub use self::options::{
    DEFAULT_PRIORITY, DEFAULT_TTR, MAX_DURATION, MIN_TTR, ReleaseOptions, SubmitOptions,
    TubeSettings, URGENT_PRIORITY,
};
pub use self::stats::TubeStats;
pub use self::tube_name::{TubeName, TubeNameError};
