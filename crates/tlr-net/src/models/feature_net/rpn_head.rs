//! # Region Proposal Head
//!
//! ```text
//! x        = relu(rpn_deconv(res4f))       # 4x4 / 2 transposed conv, x2 upsample
//! cls      = rpn_cls_score(x)              # 1x1, 2 * num_anchors
//! bbox     = rpn_bbox_pred(x)              # 1x1, 4 * num_anchors
//! cls_prob = anchor_softmax(cls)
//! ```
//!
//! Box deltas are returned undecoded.

use crate::compat::conv_shape::maybe_conv_transpose_output_shape;
use crate::errors::ParamError;
use crate::utility::params::{NamedParameters, ParameterMap};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Relu;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::softmax;

/// Kernel of the upsampling transposed convs.
pub const DECONV_KERNEL: [usize; 2] = [4, 4];

/// Stride of the upsampling transposed convs.
pub const DECONV_STRIDE: [usize; 2] = [2, 2];

/// Padding of the upsampling transposed convs.
pub const DECONV_PADDING: [usize; 2] = [1, 1];

/// Output resolution of a ``4x4 / 2`` padding-1 transposed conv.
///
/// This is exactly twice the input resolution.
pub fn deconv_output_resolution(input_resolution: [usize; 2]) -> Option<[usize; 2]> {
    maybe_conv_transpose_output_shape(
        input_resolution,
        DECONV_KERNEL,
        DECONV_STRIDE,
        DECONV_PADDING,
        [1, 1],
        [0, 0],
    )
}

/// Softmax over the two class scores of every anchor.
///
/// ``scores`` is ``[batch, 2 * num_anchors, height, width]``, with channel
/// ``a`` holding the background score of anchor ``a``, and channel
/// ``num_anchors + a`` its foreground score.
///
/// The scores are viewed as ``[batch, 2, num_anchors * height, width]``,
/// normalized over dim 1, and restored to the input layout.
pub fn anchor_softmax<B: Backend>(
    scores: Tensor<B, 4>,
    num_anchors: usize,
) -> Tensor<B, 4> {
    let [batch, height, width] = unpack_shape_contract!(
        ["batch", "classes" * "num_anchors", "height", "width"],
        &scores,
        &["batch", "height", "width"],
        &[("classes", 2), ("num_anchors", num_anchors)]
    );

    let x = scores.reshape([batch, 2, num_anchors * height, width]);
    let x = softmax(x, 1);
    x.reshape([batch, 2 * num_anchors, height, width])
}

/// [`RegionProposalHead`] Config.
#[derive(Config, Debug)]
pub struct RegionProposalHeadConfig {
    /// Input channels.
    #[config(default = 64)]
    pub in_channels: usize,

    /// Channels of the upsampled feature map.
    #[config(default = 256)]
    pub hidden_channels: usize,

    /// Number of anchors per position.
    #[config(default = 15)]
    pub num_anchors: usize,
}

impl RegionProposalHeadConfig {
    /// Classification channels; ``2 * num_anchors``.
    pub fn cls_channels(&self) -> usize {
        2 * self.num_anchors
    }

    /// Regression channels; ``4 * num_anchors``.
    pub fn bbox_channels(&self) -> usize {
        4 * self.num_anchors
    }

    /// Initialize a [`RegionProposalHead`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> RegionProposalHead<B> {
        RegionProposalHead {
            num_anchors: self.num_anchors,
            deconv: ConvTranspose2dConfig::new(
                [self.in_channels, self.hidden_channels],
                DECONV_KERNEL,
            )
            .with_stride(DECONV_STRIDE)
            .with_padding(DECONV_PADDING)
            .init(device),
            act: Relu,
            cls_score: Conv2dConfig::new([self.hidden_channels, self.cls_channels()], [1, 1])
                .init(device),
            bbox_pred: Conv2dConfig::new([self.hidden_channels, self.bbox_channels()], [1, 1])
                .init(device),
        }
    }
}

/// Region proposal outputs.
#[derive(Debug, Clone)]
pub struct RegionProposals<B: Backend> {
    /// ``[batch, 2 * num_anchors, height, width]`` class probabilities.
    pub cls_prob: Tensor<B, 4>,

    /// ``[batch, 4 * num_anchors, height, width]`` box deltas.
    pub bbox_pred: Tensor<B, 4>,
}

/// Region proposal head.
#[derive(Module, Debug)]
pub struct RegionProposalHead<B: Backend> {
    /// Number of anchors per position.
    pub num_anchors: usize,

    /// Upsampling transposed conv.
    pub deconv: ConvTranspose2d<B>,

    /// Activation.
    pub act: Relu,

    /// Class scores.
    pub cls_score: Conv2d<B>,

    /// Box deltas.
    pub bbox_pred: Conv2d<B>,
}

impl<B: Backend> RegionProposalHead<B> {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        // ``[in_channels, out_channels / groups, kh, kw]``
        self.deconv.weight.dims()[0]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// [`RegionProposals`] at ``[height * 2, width * 2]``.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> RegionProposals<B> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = deconv_output_resolution([height, width])
            .unwrap_or_else(|| panic!("rpn_deconv: no output for {height}x{width}"));

        let x = self.act.forward(self.deconv.forward(input));

        let cls_prob = anchor_softmax(self.cls_score.forward(x.clone()), self.num_anchors);
        let bbox_pred = self.bbox_pred.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "anchors" * "per_anchor", "out_height", "out_width"],
            &cls_prob,
            &[
                ("batch", batch),
                ("anchors", self.num_anchors),
                ("per_anchor", 2),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );
        assert_shape_contract_periodically!(
            ["batch", "anchors" * "per_anchor", "out_height", "out_width"],
            &bbox_pred,
            &[
                ("batch", batch),
                ("anchors", self.num_anchors),
                ("per_anchor", 4),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        RegionProposals {
            cls_prob,
            bbox_pred,
        }
    }
}

impl<B: Backend> NamedParameters<B> for RegionProposalHead<B> {
    /// Layers are named absolutely; `prefix` is ignored.
    fn export_named(
        &self,
        _prefix: &str,
        out: &mut ParameterMap,
    ) {
        self.deconv.export_named("rpn_deconv", out);
        self.cls_score.export_named("rpn_cls_score", out);
        self.bbox_pred.export_named("rpn_bbox_pred", out);
    }

    fn load_named(
        self,
        _prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        Ok(RegionProposalHead {
            num_anchors: self.num_anchors,
            deconv: self.deconv.load_named("rpn_deconv", params)?,
            act: self.act,
            cls_score: self.cls_score.load_named("rpn_cls_score", params)?,
            bbox_pred: self.bbox_pred.load_named("rpn_bbox_pred", params)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData, Tolerance};
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    #[test]
    fn test_deconv_output_resolution() {
        assert_eq!(deconv_output_resolution([16, 16]), Some([32, 32]));
        assert_eq!(deconv_output_resolution([1, 3]), Some([2, 6]));
    }

    #[test]
    fn test_anchor_softmax_pairs() {
        let device = Default::default();
        let num_anchors = 3;

        let scores = Tensor::<B, 4>::random(
            [2, 2 * num_anchors, 4, 5],
            Distribution::Normal(0.0, 3.0),
            &device,
        );
        let probs = anchor_softmax(scores, num_anchors);
        assert_eq!(probs.dims(), [2, 6, 4, 5]);

        let background = probs.clone().slice([0..2, 0..num_anchors, 0..4, 0..5]);
        let foreground = probs.slice([0..2, num_anchors..2 * num_anchors, 0..4, 0..5]);
        (background + foreground).to_data().assert_approx_eq::<f32>(
            &TensorData::new(vec![1.0f32; 2 * num_anchors * 4 * 5], [2, num_anchors, 4, 5]),
            Tolerance::default(),
        );
    }

    #[test]
    fn test_anchor_softmax_pairs_channel_with_its_anchor() {
        let device = Default::default();

        // Two anchors: channels (0, 2) and (1, 3) pair up.
        let scores = Tensor::<B, 4>::from_data(
            TensorData::new(vec![0.0f32, 3.0_f32.ln(), 0.0, 0.0], [1, 4, 1, 1]),
            &device,
        );
        let probs = anchor_softmax(scores, 2).into_data();
        let probs = probs.as_slice::<f32>().unwrap();

        assert_that!(probs[0] as f64, close_to(0.5, 1e-6));
        assert_that!(probs[1] as f64, close_to(0.75, 1e-6));
        assert_that!(probs[2] as f64, close_to(0.5, 1e-6));
        assert_that!(probs[3] as f64, close_to(0.25, 1e-6));
    }

    #[test]
    fn test_rpn_head_forward_shape() {
        let device = Default::default();
        let head: RegionProposalHead<B> = RegionProposalHeadConfig::new()
            .with_in_channels(8)
            .with_hidden_channels(16)
            .init(&device);
        assert_eq!(head.in_channels(), 8);

        let input = Tensor::random([2, 8, 3, 5], Distribution::Default, &device);
        let output = head.forward(input);

        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output.cls_prob,
            &[("batch", 2), ("channels", 30), ("height", 6), ("width", 10)],
        );
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output.bbox_pred,
            &[("batch", 2), ("channels", 60), ("height", 6), ("width", 10)],
        );
    }

    #[test]
    fn test_rpn_head_bias_only() {
        let device = Default::default();
        let config = RegionProposalHeadConfig::new()
            .with_in_channels(4)
            .with_hidden_channels(8);
        let head: RegionProposalHead<B> = config.init(&device);

        let mut params = ParameterMap::new();
        for (name, data) in head.export_parameters() {
            let zeros = TensorData::new(vec![0.0f32; data.num_elements()], data.shape.clone());
            params.insert(name, zeros);
        }
        let mut cls_bias = vec![0.0f32; 30];
        cls_bias[15..].fill(3.0_f32.ln());
        params.insert("rpn_cls_score.bias".to_string(), TensorData::new(cls_bias, [30]));
        let head = head.load_parameters(&params).unwrap();

        let input = Tensor::random([1, 4, 2, 2], Distribution::Default, &device);
        let output = head.forward(input);

        let mut expected = vec![0.25f32; 15 * 16];
        expected.extend(vec![0.75f32; 15 * 16]);
        output.cls_prob.to_data().assert_approx_eq::<f32>(
            &TensorData::new(expected, [1, 30, 4, 4]),
            Tolerance::default(),
        );
        output
            .bbox_pred
            .to_data()
            .assert_eq(&TensorData::new(vec![0.0f32; 60 * 16], [1, 60, 4, 4]), false);
    }

    #[test]
    fn test_rpn_head_parameter_names() {
        let device = Default::default();
        let head: RegionProposalHead<B> = RegionProposalHeadConfig::new().init(&device);

        let params = head.export_parameters();
        assert_eq!(
            params.keys().cloned().collect::<Vec<_>>(),
            vec![
                "rpn_bbox_pred.bias",
                "rpn_bbox_pred.weight",
                "rpn_cls_score.bias",
                "rpn_cls_score.weight",
                "rpn_deconv.bias",
                "rpn_deconv.weight",
            ]
        );
        assert_eq!(params["rpn_deconv.weight"].shape, vec![64, 256, 4, 4]);
        assert_eq!(params["rpn_cls_score.weight"].shape, vec![30, 256, 1, 1]);
        assert_eq!(params["rpn_bbox_pred.weight"].shape, vec![60, 256, 1, 1]);
    }
}
