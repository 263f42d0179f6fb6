//! Rolling group deployment behind a load balancer.
//!
//! Each group of nodes is taken out of rotation, checked for quiesced
//! configuration management, upgraded or downgraded, and put back, with an
//! operator confirmation between groups. The crate is split the same way as
//! the control flow:
//!
//! - **[`core`]**: Pure logic (phase state machine, first-failure reduction,
//!   result types). No I/O.
//! - **[`io`]**: Collaborator traits and their MCollective adapter, process
//!   execution, configuration, the confirmation gate, and report storage.
//!
//! Orchestration modules ([`phase`], [`group`], [`rollout`], [`status`]) tie the
//! two together; [`render`] turns progress events into operator lines.

pub mod core;
pub mod exit_codes;
pub mod group;
pub mod io;
pub mod logging;
pub mod phase;
pub mod render;
pub mod rollout;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
