//! Export of the finished catalog and run report.

pub mod json;
