//! # Normalization
//!
//! Inference-mode normalization, split into statistics and affine groups.
pub mod channel_affine;
pub mod standardize;
