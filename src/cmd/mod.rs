//! Command-line arguments of the binaries.

pub mod coordinator;
pub mod ctl;
pub mod worker;
