//! BGS Monitor - background simulation tick detection and influence reports

pub mod analysis;
pub mod core;
pub mod monitor;
pub mod report;
pub mod source;
pub mod tick;
