//! Sliding event-time windows and the aggregate functions evaluated over them.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::EventTime;

mod assigner;
mod functions;
mod primitives;

pub use assigner::*;
pub use functions::*;
pub use primitives::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
