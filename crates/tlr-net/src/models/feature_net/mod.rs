//! # `FeatureNet`
//!
//! A `ResNet`-style backbone feeding a region proposal head and a
//! dual-path detection head.

pub mod dual_path_head;
pub mod feature_net_model;
pub mod residual_group;
pub mod rpn_head;
pub mod stage;
pub mod stem;
pub mod util;
