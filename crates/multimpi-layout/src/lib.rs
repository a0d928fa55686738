//! Resource allocation translator.
//!
//! Turns a leader's assignment (own cores plus `(follower, cores)` pairs)
//! into the host files an external multi-host launcher reads.

pub mod flavor;
pub mod hosts;
pub mod roles;
pub mod slots;

pub use flavor::{LauncherFiles, LauncherFlavor};
pub use hosts::HostCores;
pub use roles::RoleLayout;
pub use slots::slot_list;
