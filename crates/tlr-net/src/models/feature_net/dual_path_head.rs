//! # Dual-Path Detection Head
//!
//! ```text
//! x     = relu(conv_new(res5c))            # x2 upsample
//! left  = relu(conv_left_1xk(relu(conv_left_kx1(x))))
//! right = relu(conv_right_kx1(relu(conv_right_1xk(x))))
//! out   = left + right
//! ```
//!
//! The two paths apply the same separable ``k x k`` receptive field in
//! opposite orders.

use crate::compat::conv_shape::maybe_conv_output_shape;
use crate::errors::ParamError;
use crate::models::feature_net::rpn_head::{
    DECONV_KERNEL, DECONV_PADDING, DECONV_STRIDE, deconv_output_resolution,
};
use crate::utility::params::{NamedParameters, ParameterMap};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`DualPathHead`] Config.
#[derive(Config, Debug)]
pub struct DualPathHeadConfig {
    /// Input channels.
    #[config(default = 128)]
    pub in_channels: usize,

    /// Channels between the two convs of each path.
    #[config(default = 128)]
    pub hidden_channels: usize,

    /// Output channels.
    #[config(default = 490)]
    pub out_channels: usize,

    /// Length of the separable kernels; must be odd.
    #[config(default = 9)]
    pub kernel_size: usize,
}

impl DualPathHeadConfig {
    fn kx1(
        &self,
        channels: [usize; 2],
    ) -> Conv2dConfig {
        let k = self.kernel_size;
        Conv2dConfig::new(channels, [k, 1]).with_padding(PaddingConfig2d::Explicit(k / 2, 0))
    }

    fn one_by_k(
        &self,
        channels: [usize; 2],
    ) -> Conv2dConfig {
        let k = self.kernel_size;
        Conv2dConfig::new(channels, [1, k]).with_padding(PaddingConfig2d::Explicit(0, k / 2))
    }

    /// Initialize a [`DualPathHead`].
    ///
    /// # Panics
    ///
    /// If `kernel_size` is even.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DualPathHead<B> {
        assert!(
            self.kernel_size % 2 == 1,
            "kernel_size must be odd: {}",
            self.kernel_size
        );
        let [c_in, c_mid, c_out] = [self.in_channels, self.hidden_channels, self.out_channels];

        DualPathHead {
            conv_new: ConvTranspose2dConfig::new([c_in, c_in], DECONV_KERNEL)
                .with_stride(DECONV_STRIDE)
                .with_padding(DECONV_PADDING)
                .init(device),
            left_kx1: self.kx1([c_in, c_mid]).init(device),
            left_1xk: self.one_by_k([c_mid, c_out]).init(device),
            right_1xk: self.one_by_k([c_in, c_mid]).init(device),
            right_kx1: self.kx1([c_mid, c_out]).init(device),
            act: Relu,
        }
    }
}

/// Dual-path detection head.
#[derive(Module, Debug)]
pub struct DualPathHead<B: Backend> {
    /// Upsampling transposed conv.
    pub conv_new: ConvTranspose2d<B>,

    /// Left path, vertical conv.
    pub left_kx1: Conv2d<B>,

    /// Left path, horizontal conv.
    pub left_1xk: Conv2d<B>,

    /// Right path, horizontal conv.
    pub right_1xk: Conv2d<B>,

    /// Right path, vertical conv.
    pub right_kx1: Conv2d<B>,

    /// Activation.
    pub act: Relu,
}

impl<B: Backend> DualPathHead<B> {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.conv_new.weight.dims()[0]
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.left_1xk.weight.dims()[0]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height * 2, width * 2]``
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
        let [out_height, out_width] = deconv_output_resolution([height, width])
            .unwrap_or_else(|| panic!("conv_new: no output for {height}x{width}"));

        let x = self.act.forward(self.conv_new.forward(input));

        let left = self.act.forward(self.left_kx1.forward(x.clone()));
        let left = self.act.forward(self.left_1xk.forward(left));

        let right = self.act.forward(self.right_1xk.forward(x));
        let right = self.act.forward(self.right_kx1.forward(right));

        bimm_contracts::define_shape_contract!(
            OUT_CONTRACT,
            ["batch", "out_channels", "out_height", "out_width"],
        );
        let out_bindings = [
            ("batch", batch),
            ("out_channels", self.out_channels()),
            ("out_height", out_height),
            ("out_width", out_width),
        ];
        assert_shape_contract_periodically!(OUT_CONTRACT, &left, &out_bindings);
        assert_shape_contract_periodically!(OUT_CONTRACT, &right, &out_bindings);

        left + right
    }
}

impl<B: Backend> NamedParameters<B> for DualPathHead<B> {
    /// Layers are named absolutely; `prefix` is ignored.
    fn export_named(
        &self,
        _prefix: &str,
        out: &mut ParameterMap,
    ) {
        self.conv_new.export_named("conv_new", out);
        self.left_kx1.export_named("conv_left_kx1", out);
        self.left_1xk.export_named("conv_left_1xk", out);
        self.right_1xk.export_named("conv_right_1xk", out);
        self.right_kx1.export_named("conv_right_kx1", out);
    }

    fn load_named(
        self,
        _prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        Ok(DualPathHead {
            conv_new: self.conv_new.load_named("conv_new", params)?,
            left_kx1: self.left_kx1.load_named("conv_left_kx1", params)?,
            left_1xk: self.left_1xk.load_named("conv_left_1xk", params)?,
            right_1xk: self.right_1xk.load_named("conv_right_1xk", params)?,
            right_kx1: self.right_kx1.load_named("conv_right_kx1", params)?,
            act: self.act,
        })
    }
}

/// Check that a separable ``k x 1`` / ``1 x k`` pair preserves a resolution.
///
/// Returns the resolution after both convs.
pub fn separable_output_resolution(
    input_resolution: [usize; 2],
    kernel_size: usize,
) -> Option<[usize; 2]> {
    let pad = kernel_size / 2;
    let x = maybe_conv_output_shape(
        input_resolution,
        [kernel_size, 1],
        [1, 1],
        [pad, 0],
        [1, 1],
    )?;
    maybe_conv_output_shape(x, [1, kernel_size], [1, 1], [0, pad], [1, 1])
}
