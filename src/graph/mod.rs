//! Graph Engine
//!
//! Pure queries over the capability dependency graph. The module registry
//! turns a non-empty result into a rejected batch.

mod cycles;

pub use cycles::{
    adjacency_from_edges, describe_first_cycle, detect_cycles, find_cycle_path, Adjacency, Edge,
};
