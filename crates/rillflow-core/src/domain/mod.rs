//! Domain model: process definitions, tokens, history, instances, and
//! the persistence seam.

pub mod events;
pub mod flow_graph;
pub mod history;
pub mod instance;
pub mod persistence;
pub mod process_state;
