//! # `FeatureNet` Model
//!
//! ```text
//! pool1 = stem(x)                          # /4
//! res2c = stage2(pool1)
//! res3d = stage3(res2c)                    # /8
//! res4f = stage4(res3d)                    # /16
//! res5c = stage5(res4f)                    # dilated, /16
//!
//! rpn_cls_prob, rpn_bbox_pred = rpn_head(res4f)   # /8
//! features                    = dual_head(res5c)  # /8
//! ```
//!
//! [`FeatureNetConfig::new`] describes the fixed architecture; the stages
//! are built from [`FEATURE_NET_STAGES`].

use crate::errors::{ParamError, ShapeError, TopologyError};
use crate::models::feature_net::dual_path_head::{
    DualPathHead, DualPathHeadConfig, separable_output_resolution,
};
use crate::models::feature_net::rpn_head::{
    RegionProposalHead, RegionProposalHeadConfig, deconv_output_resolution,
};
use crate::models::feature_net::stage::{FEATURE_NET_STAGES, ResidualStage, ResidualStageConfig};
use crate::models::feature_net::stem::{FeatureNetStem, FeatureNetStemConfig};
use crate::models::feature_net::util::{residual_group_name, stride_div_output_resolution};
use crate::utility::params::{NamedParameters, ParameterMap};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Resolution reduction of the stem.
const STEM_REDUCTION: usize = 4;

/// Smallest height and width of the last stage's output.
///
/// The dilated ``3x3`` convs of the last stage need at least ``2x2``.
const MIN_FINAL_RESOLUTION: usize = 2;

/// Block name used in input errors.
const INPUT_BLOCK: &str = "conv1";

/// Check an input shape against the network's requirements.
///
/// # Errors
///
/// A [`ShapeError`] naming the stem (``conv1``) if:
/// * the batch is empty,
/// * the channels are not `in_channels`,
/// * the height or width is not a multiple of `alignment`,
/// * the height or width is smaller than `minimum`.
pub fn check_input_shape(
    dims: [usize; 4],
    in_channels: usize,
    alignment: usize,
    minimum: usize,
) -> Result<(), ShapeError> {
    let [batch, channels, height, width] = dims;
    if batch == 0 {
        return Err(ShapeError::EmptyBatch {
            block: INPUT_BLOCK.to_string(),
        });
    }
    if channels != in_channels {
        return Err(ShapeError::ChannelMismatch {
            block: INPUT_BLOCK.to_string(),
            expected: in_channels,
            actual: channels,
        });
    }
    let accepted = |size: usize| size != 0 && size >= minimum && size % alignment == 0;
    if !accepted(height) || !accepted(width) {
        return Err(ShapeError::ResolutionMismatch {
            block: INPUT_BLOCK.to_string(),
            alignment,
            minimum,
            actual: [height, width],
        });
    }
    Ok(())
}

/// Predicted output shapes of a [`FeatureNet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureNetShapes {
    /// ``[batch, 2 * num_anchors, height, width]``
    pub rpn_cls_prob: [usize; 4],

    /// ``[batch, 4 * num_anchors, height, width]``
    pub rpn_bbox_pred: [usize; 4],

    /// ``[batch, out_channels, height, width]``
    pub features: [usize; 4],
}

/// [`FeatureNet`] Config.
#[derive(Config, Debug)]
pub struct FeatureNetConfig {
    /// The input stem.
    #[config(default = "FeatureNetStemConfig::new()")]
    pub stem: FeatureNetStemConfig,

    /// The residual stages, in order.
    #[config(default = "FEATURE_NET_STAGES.iter().map(ResidualStageConfig::from_spec).collect()")]
    pub stages: Vec<ResidualStageConfig>,

    /// Stage number whose output feeds the region proposal head.
    #[config(default = 4)]
    pub rpn_stage: usize,

    /// The region proposal head.
    #[config(default = "RegionProposalHeadConfig::new()")]
    pub rpn: RegionProposalHeadConfig,

    /// The dual-path head; fed by the last stage.
    #[config(default = "DualPathHeadConfig::new()")]
    pub head: DualPathHeadConfig,
}

impl FeatureNetConfig {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels
    }

    /// Required alignment of the input height and width.
    ///
    /// Every strided reduction is exact on aligned inputs.
    pub fn input_alignment(&self) -> usize {
        STEM_REDUCTION * self.stages.iter().map(|s| s.stride()).product::<usize>()
    }

    /// Smallest accepted input height and width.
    pub fn min_input_resolution(&self) -> usize {
        MIN_FINAL_RESOLUTION * self.input_alignment()
    }

    fn rpn_stage_index(&self) -> Option<usize> {
        self.stages.iter().position(|s| s.stage == self.rpn_stage)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), TopologyError> {
        for stage in &self.stages {
            stage.try_validate()?;
        }

        let Some(last) = self.stages.last() else {
            return Err(TopologyError::EmptyStage { stage: 0 });
        };

        let mut from = INPUT_BLOCK.to_string();
        let mut out_channels = self.stem.out_channels;
        for stage in &self.stages {
            if stage.in_planes() != out_channels {
                return Err(TopologyError::ChannelChain {
                    from,
                    out_channels,
                    to: residual_group_name(stage.stage, 0),
                    in_channels: stage.in_planes(),
                });
            }
            from = residual_group_name(stage.stage, stage.len() - 1);
            out_channels = stage.out_planes();
        }

        let rpn_index = self
            .rpn_stage_index()
            .ok_or(TopologyError::EmptyStage {
                stage: self.rpn_stage,
            })?;
        let rpn_source = &self.stages[rpn_index];
        if rpn_source.out_planes() != self.rpn.in_channels {
            return Err(TopologyError::ChannelChain {
                from: residual_group_name(rpn_source.stage, rpn_source.len() - 1),
                out_channels: rpn_source.out_planes(),
                to: "rpn_deconv".to_string(),
                in_channels: self.rpn.in_channels,
            });
        }

        if last.out_planes() != self.head.in_channels {
            return Err(TopologyError::ChannelChain {
                from: residual_group_name(last.stage, last.len() - 1),
                out_channels: last.out_planes(),
                to: "conv_new".to_string(),
                in_channels: self.head.in_channels,
            });
        }

        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Predict the output shapes for a ``[batch, height, width]`` input.
    ///
    /// # Errors
    ///
    /// The [`ShapeError`] which [`FeatureNet::try_forward`] would return.
    pub fn output_shapes(
        &self,
        input: [usize; 3],
    ) -> Result<FeatureNetShapes, ShapeError> {
        let [batch, height, width] = input;
        check_input_shape(
            [batch, self.in_channels(), height, width],
            self.in_channels(),
            self.input_alignment(),
            self.min_input_resolution(),
        )?;

        let unsupported = || ShapeError::ResolutionMismatch {
            block: INPUT_BLOCK.to_string(),
            alignment: self.input_alignment(),
            minimum: self.min_input_resolution(),
            actual: [height, width],
        };

        let mut resolution = self
            .stem
            .output_resolution([height, width])
            .ok_or_else(unsupported)?;
        let mut rpn_resolution = None;
        for stage in &self.stages {
            resolution = stride_div_output_resolution(resolution, stage.stride());
            if stage.stage == self.rpn_stage {
                rpn_resolution = Some(resolution);
            }
        }

        let [rpn_h, rpn_w] = rpn_resolution
            .and_then(deconv_output_resolution)
            .ok_or_else(unsupported)?;
        let [h, w] = deconv_output_resolution(resolution)
            .and_then(|r| separable_output_resolution(r, self.head.kernel_size))
            .ok_or_else(unsupported)?;

        Ok(FeatureNetShapes {
            rpn_cls_prob: [batch, self.rpn.cls_channels(), rpn_h, rpn_w],
            rpn_bbox_pred: [batch, self.rpn.bbox_channels(), rpn_h, rpn_w],
            features: [batch, self.head.out_channels, h, w],
        })
    }

    /// Initialize a [`FeatureNet`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> FeatureNet<B> {
        self.expect_valid();

        let rpn_stage_index = self.rpn_stage_index().unwrap_or_default();
        let input_alignment = self.input_alignment();
        let min_input_resolution = self.min_input_resolution();
        log::debug!(
            "FeatureNet: {} stages, {} residual groups, input alignment {}, minimum input {}",
            self.stages.len(),
            self.stages.iter().map(|s| s.len()).sum::<usize>(),
            input_alignment,
            min_input_resolution,
        );

        FeatureNet {
            stem: self.stem.init(device),
            stages: self
                .stages
                .into_iter()
                .map(|stage| stage.init(device))
                .collect(),
            rpn_stage_index,
            input_alignment,
            min_input_resolution,
            rpn: self.rpn.init(device),
            head: self.head.init(device),
        }
    }
}

/// Backbone feature taps.
#[derive(Debug, Clone)]
pub struct BackboneFeatures<B: Backend> {
    /// Output of the region proposal stage (``res4f``).
    pub res4f: Tensor<B, 4>,

    /// Output of the last stage (``res5c``).
    pub res5c: Tensor<B, 4>,
}

/// [`FeatureNet`] outputs.
#[derive(Debug, Clone)]
pub struct FeatureNetOutput<B: Backend> {
    /// ``[batch, 30, height/8, width/8]`` anchor class probabilities.
    ///
    /// Channel ``a`` is the background probability of anchor ``a``;
    /// channel ``15 + a`` its foreground probability.
    pub rpn_cls_prob: Tensor<B, 4>,

    /// ``[batch, 60, height/8, width/8]`` undecoded box deltas.
    pub rpn_bbox_pred: Tensor<B, 4>,

    /// ``[batch, 490, height/8, width/8]`` fused detection features.
    pub features: Tensor<B, 4>,
}

/// Feature / detection network.
#[derive(Module, Debug)]
pub struct FeatureNet<B: Backend> {
    /// Input stem.
    pub stem: FeatureNetStem<B>,

    /// Residual stages.
    pub stages: Vec<ResidualStage<B>>,

    /// Index of the stage feeding `rpn`.
    pub rpn_stage_index: usize,

    /// Required alignment of the input height and width.
    pub input_alignment: usize,

    /// Smallest accepted input height and width.
    pub min_input_resolution: usize,

    /// Region proposal head.
    pub rpn: RegionProposalHead<B>,

    /// Dual-path detection head.
    pub head: DualPathHead<B>,
}

impl<B: Backend> FeatureNet<B> {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// Check an input tensor.
    ///
    /// # Errors
    ///
    /// See [`check_input_shape`].
    pub fn check_input(
        &self,
        input: &Tensor<B, 4>,
    ) -> Result<(), ShapeError> {
        check_input_shape(
            input.dims(),
            self.in_channels(),
            self.input_alignment,
            self.min_input_resolution,
        )
    }

    /// Run the stem and the residual stages.
    ///
    /// # Panics
    ///
    /// On shape contract violations.
    pub fn forward_backbone(
        &self,
        input: Tensor<B, 4>,
    ) -> BackboneFeatures<B> {
        let mut x = self.stem.forward(input);
        let mut res4f = None;
        for (idx, stage) in self.stages.iter().enumerate() {
            x = stage.forward(x);
            if idx == self.rpn_stage_index {
                res4f = Some(x.clone());
            }
        }

        BackboneFeatures {
            res4f: res4f.unwrap_or_else(|| x.clone()),
            res5c: x,
        }
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, 3, height, width]``; height and width must be
    ///   multiples of 16, at least 32.
    ///
    /// # Errors
    ///
    /// A [`ShapeError`] naming ``conv1`` if the input is rejected.
    pub fn try_forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Result<FeatureNetOutput<B>, ShapeError> {
        self.check_input(&input)?;

        let BackboneFeatures { res4f, res5c } = self.forward_backbone(input);
        let proposals = self.rpn.forward(res4f);
        let features = self.head.forward(res5c);

        Ok(FeatureNetOutput {
            rpn_cls_prob: proposals.cls_prob,
            rpn_bbox_pred: proposals.bbox_pred,
            features,
        })
    }

    /// Forward Pass.
    ///
    /// The ``panic``-ing variant of [`FeatureNet::try_forward`].
    ///
    /// # Panics
    ///
    /// If the input is rejected.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> FeatureNetOutput<B> {
        match self.try_forward(input) {
            Ok(output) => output,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<B: Backend> NamedParameters<B> for FeatureNet<B> {
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    ) {
        self.stem.export_named(prefix, out);
        for stage in &self.stages {
            stage.export_named(prefix, out);
        }
        self.rpn.export_named(prefix, out);
        self.head.export_named(prefix, out);
    }

    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        Ok(FeatureNet {
            stem: self.stem.load_named(prefix, params)?,
            stages: self
                .stages
                .into_iter()
                .map(|stage| stage.load_named(prefix, params))
                .collect::<Result<Vec<_>, _>>()?,
            rpn_stage_index: self.rpn_stage_index,
            input_alignment: self.input_alignment,
            min_input_resolution: self.min_input_resolution,
            rpn: self.rpn.load_named(prefix, params)?,
            head: self.head.load_named(prefix, params)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::feature_net::residual_group::ResidualGroupMeta;
    use crate::utility::record::count_parameters;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type B = NdArray<f32>;

    #[test]
    fn test_feature_net_config() {
        let config = FeatureNetConfig::new();
        assert_eq!(config.try_validate(), Ok(()));
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.input_alignment(), 16);
        assert_eq!(config.min_input_resolution(), 32);
        assert_eq!(config.stages.len(), 4);
        assert_eq!(
            config.stages.iter().map(|s| s.len()).collect::<Vec<_>>(),
            vec![3, 4, 6, 3]
        );
        assert_eq!(
            config
                .stages
                .iter()
                .map(|s| s.out_planes())
                .collect::<Vec<_>>(),
            vec![16, 32, 64, 128]
        );

        let res5 = &config.stages[3];
        assert!(res5.groups.iter().all(|g| g.dilation() == 2));
        assert_eq!(res5.groups[0].effective_first_dilation(), 1);
        assert_eq!(res5.groups[1].effective_first_dilation(), 2);
    }

    #[test]
    fn test_feature_net_config_json() {
        let config = FeatureNetConfig::new().with_rpn_stage(4);
        let json = serde_json::to_string(&config).unwrap();
        let restored: FeatureNetConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.try_validate(), Ok(()));
        assert_eq!(restored.stages.len(), 4);
        assert_eq!(restored.stages[2].group_names().last().unwrap(), "res4f");
        assert_eq!(restored.head.out_channels, 490);
        assert_eq!(restored.rpn.num_anchors, 15);
    }

    #[test]
    fn test_feature_net_config_validation() {
        let config = FeatureNetConfig::new()
            .with_rpn(RegionProposalHeadConfig::new().with_in_channels(32));
        assert_eq!(
            config.try_validate(),
            Err(TopologyError::ChannelChain {
                from: "res4f".to_string(),
                out_channels: 64,
                to: "rpn_deconv".to_string(),
                in_channels: 32,
            })
        );

        let config = FeatureNetConfig::new()
            .with_stem(FeatureNetStemConfig::new().with_out_channels(8));
        assert_eq!(
            config.try_validate(),
            Err(TopologyError::ChannelChain {
                from: "conv1".to_string(),
                out_channels: 8,
                to: "res2a".to_string(),
                in_channels: 16,
            })
        );

        let config = FeatureNetConfig::new().with_rpn_stage(7);
        assert_eq!(
            config.try_validate(),
            Err(TopologyError::EmptyStage { stage: 7 })
        );

        let config = FeatureNetConfig::new()
            .with_head(DualPathHeadConfig::new().with_in_channels(64));
        assert!(matches!(
            config.try_validate(),
            Err(TopologyError::ChannelChain { from, to, .. }) if from == "res5c" && to == "conv_new"
        ));
    }

    #[test]
    fn test_output_shapes() {
        let config = FeatureNetConfig::new();
        assert_eq!(
            config.output_shapes([1, 256, 256]),
            Ok(FeatureNetShapes {
                rpn_cls_prob: [1, 30, 32, 32],
                rpn_bbox_pred: [1, 60, 32, 32],
                features: [1, 490, 32, 32],
            })
        );
        assert_eq!(
            config.output_shapes([2, 32, 48]).map(|s| s.features),
            Ok([2, 490, 4, 6])
        );
        assert_eq!(
            config.output_shapes([1, 250, 256]),
            Err(ShapeError::ResolutionMismatch {
                block: "conv1".to_string(),
                alignment: 16,
                minimum: 32,
                actual: [250, 256],
            })
        );
        assert_eq!(
            config.output_shapes([2, 16, 48]),
            Err(ShapeError::ResolutionMismatch {
                block: "conv1".to_string(),
                alignment: 16,
                minimum: 32,
                actual: [16, 48],
            })
        );
        assert_eq!(
            config.output_shapes([0, 16, 16]),
            Err(ShapeError::EmptyBatch {
                block: "conv1".to_string()
            })
        );
        assert!(config.output_shapes([1, 0, 16]).is_err());
    }

    #[test]
    fn test_check_input_shape() {
        assert_eq!(check_input_shape([2, 3, 32, 64], 3, 16, 32), Ok(()));
        assert_eq!(
            check_input_shape([1, 4, 32, 32], 3, 16, 32),
            Err(ShapeError::ChannelMismatch {
                block: "conv1".to_string(),
                expected: 3,
                actual: 4,
            })
        );
        assert_eq!(
            check_input_shape([1, 3, 32, 8], 3, 16, 32),
            Err(ShapeError::ResolutionMismatch {
                block: "conv1".to_string(),
                alignment: 16,
                minimum: 32,
                actual: [32, 8],
            })
        );
        for [height, width] in [[16, 16], [16, 32], [32, 16]] {
            assert_eq!(
                check_input_shape([1, 3, height, width], 3, 16, 32),
                Err(ShapeError::ResolutionMismatch {
                    block: "conv1".to_string(),
                    alignment: 16,
                    minimum: 32,
                    actual: [height, width],
                })
            );
        }
    }

    #[test]
    fn test_feature_net_forward_shapes() {
        let device = Default::default();
        let config = FeatureNetConfig::new();
        let net: FeatureNet<B> = config.clone().init(&device);
        assert_eq!(net.input_alignment, 16);
        assert_eq!(net.min_input_resolution, 32);

        for [batch, height, width] in [[2, 32, 32], [1, 32, 48]] {
            let input = Tensor::random([batch, 3, height, width], Distribution::Default, &device);
            let output = net.forward(input);
            let shapes = config.output_shapes([batch, height, width]).unwrap();

            assert_eq!(output.rpn_cls_prob.dims(), shapes.rpn_cls_prob);
            assert_eq!(output.rpn_bbox_pred.dims(), shapes.rpn_bbox_pred);
            assert_eq!(output.features.dims(), shapes.features);
            assert_shape_contract!(
                ["batch", "channels", "out_height", "out_width"],
                &output.features,
                &[
                    ("batch", batch),
                    ("channels", 490),
                    ("out_height", height / 8),
                    ("out_width", width / 8)
                ],
            );

            // Every anchor's (background, foreground) pair sums to one.
            let [_, _, h, w] = shapes.rpn_cls_prob;
            let pairs = output.rpn_cls_prob.clone().slice([0..batch, 0..15, 0..h, 0..w])
                + output.rpn_cls_prob.slice([0..batch, 15..30, 0..h, 0..w]);
            pairs.to_data().assert_approx_eq::<f32>(
                &TensorData::new(vec![1.0f32; batch * 15 * h * w], [batch, 15, h, w]),
                burn::tensor::Tolerance::default(),
            );
        }
    }

    #[test]
    fn test_forward_backbone_taps() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);

        let input = Tensor::random([1, 3, 64, 32], Distribution::Default, &device);
        let taps = net.forward_backbone(input);
        assert_eq!(taps.res4f.dims(), [1, 64, 4, 2]);
        assert_eq!(taps.res5c.dims(), [1, 128, 4, 2]);
    }

    #[test]
    fn test_try_forward_rejects_channels() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);

        let input = Tensor::zeros([1, 4, 32, 32], &device);
        let err = net.try_forward(input).unwrap_err();
        assert_eq!(
            err,
            ShapeError::ChannelMismatch {
                block: "conv1".to_string(),
                expected: 3,
                actual: 4,
            }
        );
        assert_eq!(
            err.to_string(),
            "conv1: expected 3 input channels, found 4"
        );
    }

    #[test]
    fn test_try_forward_rejects_undersized_input() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);

        for [batch, height, width] in [[1, 16, 16], [2, 16, 16], [1, 16, 32], [1, 32, 16]] {
            let input = Tensor::random([batch, 3, height, width], Distribution::Default, &device);
            let err = net.try_forward(input).unwrap_err();
            assert_eq!(
                err,
                ShapeError::ResolutionMismatch {
                    block: "conv1".to_string(),
                    alignment: 16,
                    minimum: 32,
                    actual: [height, width],
                }
            );
        }
    }

    #[test]
    #[should_panic(expected = "conv1: expected 3 input channels, found 4")]
    fn test_forward_panics_on_channels() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);
        let _ = net.forward(Tensor::zeros([1, 4, 32, 32], &device));
    }

    #[test]
    #[should_panic(expected = "must be a multiple of 16 no smaller than 32")]
    fn test_forward_panics_on_resolution() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);
        let _ = net.forward(Tensor::zeros([1, 3, 24, 32], &device));
    }

    #[test]
    fn test_feature_net_parameter_names() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);

        let params = net.export_parameters();
        // 37 blocks of 5 tensors, 3 + 5 biased head convs.
        assert_eq!(params.len(), 37 * 5 + 2 * 3 + 2 * 5);

        for name in [
            "conv1.conv.weight",
            "conv1.bn.running_mean",
            "conv1.bn.running_var",
            "conv1.gamma",
            "conv1.beta",
            "res2a_branch1.conv.weight",
            "res3a_branch1.gamma",
            "res4f_branch2b.bn.running_var",
            "res5a_branch1.beta",
            "res5c_branch2a.conv.weight",
            "rpn_deconv.weight",
            "rpn_cls_score.bias",
            "rpn_bbox_pred.weight",
            "conv_new.bias",
            "conv_left_kx1.weight",
            "conv_left_1xk.weight",
            "conv_right_1xk.weight",
            "conv_right_kx1.bias",
        ] {
            assert!(params.contains_key(name), "missing {name}");
        }
        assert!(!params.contains_key("res2b_branch1.conv.weight"));
        assert!(!params.contains_key("conv1.conv.bias"));

        assert_eq!(params["conv1.conv.weight"].shape, vec![16, 3, 7, 7]);
        assert_eq!(params["res5b_branch2a.conv.weight"].shape, vec![128, 128, 3, 3]);
        assert!(count_parameters(&params) > 0);
    }

    #[test]
    fn test_load_parameters_errors() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);
        let params = net.export_parameters();

        let mut missing = params.clone();
        missing.remove("res3b_branch2a.bn.running_mean");
        let err = net.clone().load_parameters(&missing).unwrap_err();
        assert_eq!(
            err,
            ParamError::Missing {
                name: "res3b_branch2a.bn.running_mean".to_string()
            }
        );

        let mut extra = params.clone();
        extra.insert("res2b_branch1.gamma".to_string(), TensorData::from([1.0f32; 16]));
        let err = net.clone().load_parameters(&extra).unwrap_err();
        assert_eq!(
            err,
            ParamError::Unexpected {
                name: "res2b_branch1.gamma".to_string()
            }
        );

        let mut short = params;
        short.insert("res4c_branch2b.gamma".to_string(), TensorData::from([1.0f32; 63]));
        let err = net.load_parameters(&short).unwrap_err();
        assert_eq!(
            err,
            ParamError::ShapeMismatch {
                name: "res4c_branch2b.gamma".to_string(),
                expected: vec![64],
                actual: vec![63],
            }
        );
    }

    #[test]
    fn test_zero_input_golden() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);

        // Constant conv weights, zero biases; normalization is at identity.
        let mut params = ParameterMap::new();
        for (name, data) in net.export_parameters() {
            let value = if name.ends_with(".weight") {
                0.01f32
            } else if name.ends_with(".bias") {
                0.0
            } else {
                continue;
            };
            let constant = TensorData::new(vec![value; data.num_elements()], data.shape.clone());
            params.insert(name, constant);
        }
        for (name, data) in net.export_parameters() {
            params.entry(name).or_insert(data);
        }
        let net = net.load_parameters(&params).unwrap();

        let input = Tensor::zeros([1, 3, 256, 256], &device);
        let output = net.forward(input);

        output
            .rpn_cls_prob
            .to_data()
            .assert_eq(&TensorData::new(vec![0.5f32; 30 * 32 * 32], [1, 30, 32, 32]), false);
        output
            .rpn_bbox_pred
            .to_data()
            .assert_eq(&TensorData::new(vec![0.0f32; 60 * 32 * 32], [1, 60, 32, 32]), false);
        output
            .features
            .to_data()
            .assert_eq(&TensorData::new(vec![0.0f32; 490 * 32 * 32], [1, 490, 32, 32]), false);
    }

    /// Build a tensor by evaluating `f` at every index.
    fn tensor_from_fn(
        shape: Vec<usize>,
        f: impl Fn(&[usize]) -> f32,
    ) -> TensorData {
        let mut index = vec![0; shape.len()];
        let values: Vec<f32> = (0..shape.iter().product::<usize>())
            .map(|mut flat| {
                for d in (0..shape.len()).rev() {
                    index[d] = flat % shape[d];
                    flat /= shape[d];
                }
                f(&index[..])
            })
            .collect();
        TensorData::new(values, shape)
    }

    /// ``w`` on the central ``2x2`` taps of a ``4x4`` kernel.
    ///
    /// With stride 2 and padding 1, these reach every output position exactly once.
    fn central_taps(w: f32) -> impl Fn(&[usize]) -> f32 {
        move |i: &[usize]| {
            if (1..3).contains(&i[2]) && (1..3).contains(&i[3]) {
                w
            } else {
                0.0
            }
        }
    }

    /// ``w`` on the centre tap of a length 9 kernel along dim ``axis``.
    fn centre_tap(
        axis: usize,
        w: f32,
    ) -> impl Fn(&[usize]) -> f32 {
        move |i: &[usize]| if i[axis] == 4 { w } else { 0.0 }
    }

    #[test]
    fn test_head_wiring_golden() {
        let device = Default::default();
        let net: FeatureNet<B> = FeatureNetConfig::new().init(&device);
        let shapes: std::collections::BTreeMap<String, Vec<usize>> = net
            .export_parameters()
            .into_iter()
            .map(|(name, data)| (name, data.shape))
            .collect();
        let shape = |name: &str| shapes[name].clone();

        // Zero every conv; running stats stay at mean 0 / var 1.
        let mut params = ParameterMap::new();
        for (name, data) in net.export_parameters() {
            let value = if name.ends_with(".weight") || name.ends_with(".bias") {
                TensorData::new(vec![0.0f32; data.num_elements()], data.shape.clone())
            } else {
                data
            };
            params.insert(name, value);
        }

        // res4f = relu(0 + 1) = 1, res5c = relu(0 + 2) = 2.
        params.insert("res4f_branch2b.beta".to_string(), TensorData::from([1.0f32; 64]));
        params.insert("res5c_branch2b.beta".to_string(), TensorData::from([2.0f32; 128]));

        // rpn: hidden = 64 * 1 * (1/64) = 1.
        params.insert(
            "rpn_deconv.weight".to_string(),
            tensor_from_fn(shape("rpn_deconv.weight"), central_taps(1.0 / 64.0)),
        );
        // Foreground score ln(3), background 0; probabilities 0.75 / 0.25.
        let fg = 3.0f32.ln() / 256.0;
        params.insert(
            "rpn_cls_score.weight".to_string(),
            tensor_from_fn(shape("rpn_cls_score.weight"), |i| if i[0] >= 15 { fg } else { 0.0 }),
        );
        // bbox = 256 * (1/256) + 0.5.
        params.insert(
            "rpn_bbox_pred.weight".to_string(),
            tensor_from_fn(shape("rpn_bbox_pred.weight"), |_| 1.0 / 256.0),
        );
        params.insert("rpn_bbox_pred.bias".to_string(), TensorData::from([0.5f32; 60]));

        // head: x = 128 * 2 * (1/256) = 1.
        params.insert(
            "conv_new.weight".to_string(),
            tensor_from_fn(shape("conv_new.weight"), central_taps(1.0 / 256.0)),
        );
        // Centre taps only; left = 128 * (1/64) + 1 = 3.
        params.insert(
            "conv_left_kx1.weight".to_string(),
            tensor_from_fn(shape("conv_left_kx1.weight"), centre_tap(2, 1.0 / 128.0)),
        );
        params.insert(
            "conv_left_1xk.weight".to_string(),
            tensor_from_fn(shape("conv_left_1xk.weight"), centre_tap(3, 1.0 / 64.0)),
        );
        params.insert("conv_left_1xk.bias".to_string(), TensorData::from([1.0f32; 490]));
        // right = 128 * (1/32) + 0.5 = 4.5.
        params.insert(
            "conv_right_1xk.weight".to_string(),
            tensor_from_fn(shape("conv_right_1xk.weight"), centre_tap(3, 1.0 / 128.0)),
        );
        params.insert(
            "conv_right_kx1.weight".to_string(),
            tensor_from_fn(shape("conv_right_kx1.weight"), centre_tap(2, 1.0 / 32.0)),
        );
        params.insert("conv_right_kx1.bias".to_string(), TensorData::from([0.5f32; 490]));

        let net = net.load_parameters(&params).unwrap();
        let output = net.forward(Tensor::zeros([1, 3, 32, 32], &device));

        let mut cls_prob = vec![0.25f32; 15 * 16];
        cls_prob.extend(vec![0.75f32; 15 * 16]);
        output.rpn_cls_prob.to_data().assert_approx_eq::<f32>(
            &TensorData::new(cls_prob, [1, 30, 4, 4]),
            burn::tensor::Tolerance::default(),
        );
        output.rpn_bbox_pred.to_data().assert_approx_eq::<f32>(
            &TensorData::new(vec![1.5f32; 60 * 16], [1, 60, 4, 4]),
            burn::tensor::Tolerance::default(),
        );
        output.features.to_data().assert_approx_eq::<f32>(
            &TensorData::new(vec![7.5f32; 490 * 16], [1, 490, 4, 4]),
            burn::tensor::Tolerance::default(),
        );
    }
}
