//! Test modules for the module runtime

mod context;
mod utils;
