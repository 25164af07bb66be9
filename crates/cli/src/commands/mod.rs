//! CLI Commands

pub mod batch;
pub mod dashboard;
pub mod record;
pub mod report;
pub mod serve;
pub mod status;
