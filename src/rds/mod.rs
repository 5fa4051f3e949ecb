//! RDS domain model: decoded groups, per-station state, and the rules
//! engine that turns group streams into event lifecycles.

pub mod group;
pub mod rules;
pub mod station;

pub use group::{DecodedGroup, GroupType, OtherNetwork};
pub use rules::RulesEngine;
pub use station::{ChangeTracker, Station, StationSnapshot};
