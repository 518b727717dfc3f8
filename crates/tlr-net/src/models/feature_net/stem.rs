//! # Input Stem
//!
//! ```text
//! pool1 = max_pool(relu(conv1(x)), kernel=3, stride=2, padding=1)
//! ```
//!
//! ``conv1`` is a ``7x7`` stride-2 [`ConvBnScale2d`]; the stem reduces the
//! resolution by 4. Pooling rounds down.

use crate::compat::conv_shape::maybe_conv_output_shape;
use crate::errors::ParamError;
use crate::layers::blocks::conv_bn_scale::{ConvBnScale2d, ConvBnScale2dConfig, ConvBnScale2dMeta};
use crate::models::feature_net::util::CONV_INTO_RELU_INITIALIZER;
use crate::utility::params::{NamedParameters, ParameterMap, join_name};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

const POOL_KERNEL: [usize; 2] = [3, 3];
const POOL_STRIDE: [usize; 2] = [2, 2];
const POOL_PADDING: [usize; 2] = [1, 1];

/// [`FeatureNetStem`] Config.
#[derive(Config, Debug)]
pub struct FeatureNetStemConfig {
    /// Input channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// Output channels.
    #[config(default = 16)]
    pub out_channels: usize,

    /// Normalization numeric stability term.
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl FeatureNetStemConfig {
    fn conv1_config(&self) -> ConvBnScale2dConfig {
        ConvBnScale2dConfig::from(
            Conv2dConfig::new([self.in_channels, self.out_channels], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .with_initializer(CONV_INTO_RELU_INITIALIZER.clone()),
        )
        .with_epsilon(self.epsilon)
    }

    /// Predict the stem output resolution.
    ///
    /// # Returns
    ///
    /// ``None`` if the input is too small for the stem.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        if input_resolution.contains(&0) {
            return None;
        }
        let conv1 = self.conv1_config();
        let x = maybe_conv_output_shape(
            input_resolution,
            conv1.kernel_size(),
            conv1.stride(),
            conv1.padding(),
            conv1.dilation(),
        )?;
        maybe_conv_output_shape(x, POOL_KERNEL, POOL_STRIDE, POOL_PADDING, [1, 1])
    }

    /// Initialize a [`FeatureNetStem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FeatureNetStem<B> {
        FeatureNetStem {
            conv1: self.conv1_config().init(device),
            act: Relu,
            pool: MaxPool2dConfig::new(POOL_KERNEL)
                .with_strides(POOL_STRIDE)
                .with_padding(PaddingConfig2d::Explicit(POOL_PADDING[0], POOL_PADDING[1]))
                .init(),
        }
    }
}

/// Input stem.
#[derive(Module, Debug)]
pub struct FeatureNetStem<B: Backend> {
    /// The stem convolution.
    pub conv1: ConvBnScale2d<B>,

    /// Activation.
    pub act: Relu,

    /// Pooling.
    pub pool: MaxPool2d,
}

impl<B: Backend> FeatureNetStem<B> {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.conv1.in_channels()
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.conv1.out_channels()
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height/4, width/4]`` for aligned inputs.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())]
        );
        let conv_resolution = self.conv1.output_resolution([height, width]);
        let [out_height, out_width] = maybe_conv_output_shape(
            conv_resolution,
            POOL_KERNEL,
            POOL_STRIDE,
            POOL_PADDING,
            [1, 1],
        )
        .unwrap_or_else(|| panic!("conv1: input resolution {height}x{width} is too small"));

        let x = self.conv1.forward(input);
        let x = self.act.forward(x);
        let x = self.pool.forward(x);

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

impl<B: Backend> NamedParameters<B> for FeatureNetStem<B> {
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    ) {
        self.conv1.export_named(&join_name(prefix, "conv1"), out);
    }

    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        Ok(FeatureNetStem {
            conv1: self.conv1.load_named(&join_name(prefix, "conv1"), params)?,
            act: self.act,
            pool: self.pool,
        })
    }
}
