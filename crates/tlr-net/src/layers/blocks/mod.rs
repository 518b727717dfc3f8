//! # Blocks
pub mod conv_bn_scale;
