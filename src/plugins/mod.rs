//! Form subsystems: option identity, questions and forms, submissions, relabel
//! history, and aggregated stats.

pub mod history;
pub mod options;
pub mod questions;
pub mod stats;
pub mod submissions;
