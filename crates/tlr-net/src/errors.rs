//! # Error Types
//!
//! * [`ShapeError`] - an input tensor does not match a block's contract.
//! * [`ParamError`] - externally supplied parameters do not match the model.
//! * [`TopologyError`] - a structure config cannot be wired together.

use thiserror::Error;

/// Input shape errors.
///
/// Every variant names the block which rejected the input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// The channel dimension does not match the block's input channels.
    #[error("{block}: expected {expected} input channels, found {actual}")]
    ChannelMismatch {
        /// The rejecting block.
        block: String,
        /// Declared input channels.
        expected: usize,
        /// Channels of the offending tensor.
        actual: usize,
    },

    /// The spatial resolution is not an aligned size of at least the minimum.
    #[error(
        "{block}: input resolution {actual:?} must be a multiple of {alignment} no smaller than {minimum}"
    )]
    ResolutionMismatch {
        /// The rejecting block.
        block: String,
        /// Required alignment of height and width.
        alignment: usize,
        /// Smallest accepted height and width.
        minimum: usize,
        /// ``[height, width]`` of the offending tensor.
        actual: [usize; 2],
    },

    /// The batch dimension is empty.
    #[error("{block}: input batch is empty")]
    EmptyBatch {
        /// The rejecting block.
        block: String,
    },
}

/// Parameter ingestion errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// A required parameter was not supplied.
    #[error("missing parameter `{name}`")]
    Missing {
        /// Fully qualified parameter name.
        name: String,
    },

    /// A supplied parameter is not consumed by the model.
    #[error("unexpected parameter `{name}`")]
    Unexpected {
        /// Fully qualified parameter name.
        name: String,
    },

    /// A supplied parameter has the wrong shape.
    #[error("parameter `{name}`: expected shape {expected:?}, found {actual:?}")]
    ShapeMismatch {
        /// Fully qualified parameter name.
        name: String,
        /// Shape the model declares.
        expected: Vec<usize>,
        /// Shape which was supplied.
        actual: Vec<usize>,
    },
}

/// Structure config errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A stage has no residual groups.
    #[error("stage {stage} has no residual groups")]
    EmptyStage {
        /// Stage index.
        stage: usize,
    },

    /// Consecutive components disagree on channel counts.
    #[error("{from}.out_channels({out_channels}) != {to}.in_channels({in_channels})")]
    ChannelChain {
        /// Producing component.
        from: String,
        /// Its output channels.
        out_channels: usize,
        /// Consuming component.
        to: String,
        /// Its input channels.
        in_channels: usize,
    },

    /// A group changes channels or resolution, but has an identity skip.
    #[error(
        "{group}: identity skip cannot carry {in_channels}->{out_channels} channels at stride {stride}"
    )]
    MissingShortcut {
        /// Group name.
        group: String,
        /// Group input channels.
        in_channels: usize,
        /// Group output channels.
        out_channels: usize,
        /// Group stride.
        stride: usize,
    },
}
