//! I/O: collaborators, configuration, process execution, and persistence.

pub mod config;
pub mod control_plane;
pub mod gate;
pub mod mco;
pub mod process;
pub mod report_store;
