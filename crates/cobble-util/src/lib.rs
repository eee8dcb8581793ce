//! Shared utilities for the cobble workspace.

pub mod dym;
pub mod paths;

pub use dym::{did_you_mean, lev_edit_distance};
pub use paths::user_data_dir;
