//! # `ConvBnScale2d` Module
//!
//! A [`ConvBnScale2d`] module is:
//! * a [`Conv2d`] layer,
//! * a [`Standardize2d`] layer (running statistics, no affine parameters),
//! * a [`ChannelAffine`] layer (learned ``gamma`` / ``beta``).
//!
//! ```text
//! y = ((conv(x) - running_mean) / sqrt(running_var + epsilon)) * gamma + beta
//! ```
//!
//! This is *not* a [`burn::nn::BatchNorm`] with affine parameters:
//! the statistics and the affine vectors are four independent per-channel
//! parameter groups, which map one-to-one onto checkpoints that track
//! the normalization and the rescaling as separate layers.
//!
//! Parameter names, relative to the block:
//! * ``conv.weight``, ``conv.bias`` (when enabled),
//! * ``bn.running_mean``, ``bn.running_var``,
//! * ``gamma``, ``beta``.

use crate::compat::conv_shape::{expect_conv_output_shape, explicit_padding_2d};
use crate::errors::ParamError;
use crate::layers::norm::channel_affine::{ChannelAffine, ChannelAffineConfig};
use crate::layers::norm::standardize::{Standardize2d, Standardize2dConfig};
use crate::utility::params::{NamedParameters, ParameterMap, join_name};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// [`ConvBnScale2d`] Meta.
pub trait ConvBnScale2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Kernel size.
    fn kernel_size(&self) -> [usize; 2];

    /// Get the stride.
    fn stride(&self) -> [usize; 2];

    /// Explicit ``[height, width]`` padding.
    fn padding(&self) -> [usize; 2];

    /// Get the dilation.
    fn dilation(&self) -> [usize; 2];

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the convolution has no legal output for the input.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        expect_conv_output_shape(
            input_resolution,
            self.kernel_size(),
            self.stride(),
            self.padding(),
            self.dilation(),
        )
    }
}

/// [`ConvBnScale2d`] Config.
///
/// Implements [`ConvBnScale2dMeta`].
#[derive(Config, Debug)]
pub struct ConvBnScale2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// Normalization numeric stability term.
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl ConvBnScale2dMeta for ConvBnScale2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn padding(&self) -> [usize; 2] {
        explicit_padding_2d(&self.conv.padding, self.conv.kernel_size, self.conv.dilation)
    }

    fn dilation(&self) -> [usize; 2] {
        self.conv.dilation
    }
}

impl From<Conv2dConfig> for ConvBnScale2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl ConvBnScale2dConfig {
    /// Initialize a [`ConvBnScale2d`].
    ///
    /// The normalization statistics and the affine vectors are sized
    /// to the conv output channels, at identity values.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvBnScale2d<B> {
        let features = self.out_channels();
        ConvBnScale2d {
            conv: self.conv.init(device),
            bn: Standardize2dConfig::new(features)
                .with_epsilon(self.epsilon)
                .init(device),
            affine: ChannelAffineConfig::new(features).init(device),
        }
    }
}

/// [`Conv2d`], affine-free normalization, then per-channel affine.
///
/// Implements [`ConvBnScale2dMeta`].
#[derive(Module, Debug)]
pub struct ConvBnScale2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Running-statistics normalization.
    pub bn: Standardize2d<B>,

    /// Learned rescaling.
    pub affine: ChannelAffine<B>,
}

impl<B: Backend> ConvBnScale2dMeta for ConvBnScale2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn padding(&self) -> [usize; 2] {
        explicit_padding_2d(&self.conv.padding, self.conv.kernel_size, self.conv.dilation)
    }

    fn dilation(&self) -> [usize; 2] {
        self.conv.dilation
    }
}

impl<B: Backend> ConvBnScale2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``, with the resolution
    /// given by [`ConvBnScale2dMeta::output_resolution`].
    ///
    /// # Panics
    ///
    /// If the input channels do not match the block.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.conv.forward(input);
        let x = self.bn.forward(x);
        let x = self.affine.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}

impl<B: Backend> NamedParameters<B> for ConvBnScale2d<B> {
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    ) {
        self.conv.export_named(&join_name(prefix, "conv"), out);
        self.bn.export_named(&join_name(prefix, "bn"), out);
        self.affine.export_named(prefix, out);
    }

    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        Ok(ConvBnScale2d {
            conv: self.conv.load_named(&join_name(prefix, "conv"), params)?,
            bn: self.bn.load_named(&join_name(prefix, "bn"), params)?,
            affine: self.affine.load_named(prefix, params)?,
        })
    }
}
