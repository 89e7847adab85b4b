//! Checkpoint primitives: what gets persisted, where, and by whom.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::time::WatermarkSnapshot;
use crate::types::{CheckpointId, Offset};

mod manager;
mod metadata;
mod storage;

pub use manager::*;
pub use metadata::*;
pub use storage::*;

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
