//! Application services: the execution engine and the instance
//! registry it works against.

pub mod engine;
pub mod registry;
