//! Reusable neural network modules.
pub mod blocks;
pub mod norm;
