//! # Compat
//!
//! Shape arithmetic not (yet) exposed by ``burn``.
pub mod conv_shape;
