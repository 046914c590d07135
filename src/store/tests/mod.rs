//! Test modules for the reactive store

mod flush;
mod utils;
