//! Complete model families.
pub mod feature_net;
