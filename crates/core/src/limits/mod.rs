//! Transaction limits.
//!
//! - `types` - limit rows, requests and decisions
//! - `gateway` - where limit rows come from
//! - `engine` - checks and reserves usage per limit

pub mod engine;
pub mod gateway;
pub mod types;

pub use engine::{LimitEngine, local_day_start};
pub use gateway::{InMemoryLimitGateway, LimitGateway};
pub use types::{
    Ceilings, Direction, LimitDecision, LimitKey, LimitKind, LimitRequest, Reservation,
    TransactionLimit,
};
