#![warn(missing_docs)]
//!# tlr-net - Traffic Light Feature Network
//!
//! ## Notable Components
//!
//! * [`compat`] - shape arithmetic not (yet) exposed by ``burn``.
//! * [`errors`] - shape, parameter, and topology error types.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks`] - miscellaneous blocks.
//!     * [`layers::blocks::conv_bn_scale`] - ``Conv2d + Standardize + Affine`` block.
//!   * [`layers::norm`] - normalization layers.
//!     * [`layers::norm::standardize`] - affine-free running-statistics normalization.
//!     * [`layers::norm::channel_affine`] - per-channel ``gamma`` / ``beta``.
//! * [`models`] - complete model families.
//!   * [`models::feature_net`] - `FeatureNet` backbone and detection heads.
//! * [`utility`] - named parameter ingestion and summaries.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;
pub mod errors;
pub mod layers;
pub mod models;
pub mod utility;
