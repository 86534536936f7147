//! Loop Engine
//!
//! Each iteration decides between building a story and running a QA
//! verify/fix cycle, based only on the PRD as it is on disk right now.

mod loop_engine;

pub use loop_engine::{EngineRunner, LoopEngine, LoopParams, SENTINEL_FILE};
