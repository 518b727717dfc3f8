//! # Residual Stages
//!
//! A [`ResidualStage`] is a sequence of [`ResidualGroup`]s, named
//! ``res{stage}a``, ``res{stage}b``, ...
//!
//! The backbone stages are described by the [`FEATURE_NET_STAGES`] table,
//! and built with [`ResidualStageConfig::from_spec`].

use crate::errors::{ParamError, TopologyError};
use crate::models::feature_net::residual_group::{
    ResidualGroup, ResidualGroupConfig, ResidualGroupMeta,
};
use crate::models::feature_net::util::{residual_group_name, stride_div_output_resolution};
use crate::utility::params::{NamedParameters, ParameterMap};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// One row of a backbone stage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    /// Stage number; used in layer names.
    pub stage: usize,

    /// Input channels of the first group.
    pub in_planes: usize,

    /// Channels of every group output.
    pub planes: usize,

    /// Number of groups.
    pub depth: usize,

    /// Stride of the first group.
    pub stride: usize,

    /// Dilation of the dilated convs.
    pub dilation: usize,

    /// Dilation of the first group's ``branch2a``.
    pub first_dilation: usize,
}

/// The backbone stage table.
///
/// The first group of every stage carries a projection shortcut.
pub const FEATURE_NET_STAGES: [StageSpec; 4] = [
    StageSpec {
        stage: 2,
        in_planes: 16,
        planes: 16,
        depth: 3,
        stride: 1,
        dilation: 1,
        first_dilation: 1,
    },
    StageSpec {
        stage: 3,
        in_planes: 16,
        planes: 32,
        depth: 4,
        stride: 2,
        dilation: 1,
        first_dilation: 1,
    },
    StageSpec {
        stage: 4,
        in_planes: 32,
        planes: 64,
        depth: 6,
        stride: 2,
        dilation: 1,
        first_dilation: 1,
    },
    StageSpec {
        stage: 5,
        in_planes: 64,
        planes: 128,
        depth: 3,
        stride: 1,
        dilation: 2,
        first_dilation: 1,
    },
];

/// [`ResidualStage`] Configuration.
#[derive(Config, Debug)]
pub struct ResidualStageConfig {
    /// Stage number; used in layer names.
    pub stage: usize,

    /// The component groups.
    pub groups: Vec<ResidualGroupConfig>,
}

impl ResidualStageConfig {
    /// Build a stage from a table row.
    pub fn from_spec(spec: &StageSpec) -> Self {
        let groups = (0..spec.depth)
            .map(|idx| {
                if idx == 0 {
                    let first_dilation =
                        (spec.first_dilation != spec.dilation).then_some(spec.first_dilation);
                    ResidualGroupConfig::new(spec.in_planes, spec.planes)
                        .with_stride(spec.stride)
                        .with_dilation(spec.dilation)
                        .with_first_dilation(first_dilation)
                        .with_shortcut(true)
                } else {
                    ResidualGroupConfig::new(spec.planes, spec.planes).with_dilation(spec.dilation)
                }
            })
            .collect();

        Self::new(spec.stage, groups)
    }

    /// The number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Check if the stage is empty.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The number of input feature planes.
    ///
    /// # Panics
    ///
    /// If the stage is empty.
    pub fn in_planes(&self) -> usize {
        self.groups[0].in_planes()
    }

    /// The number of output feature planes.
    ///
    /// # Panics
    ///
    /// If the stage is empty.
    pub fn out_planes(&self) -> usize {
        self.groups[self.groups.len() - 1].planes()
    }

    /// Get the effective stride of the groups.
    pub fn stride(&self) -> usize {
        self.groups
            .iter()
            .fold(1, |acc, group| acc * group.stride())
    }

    /// The group layer names.
    pub fn group_names(&self) -> Vec<String> {
        (0..self.groups.len())
            .map(|idx| residual_group_name(self.stage, idx))
            .collect()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), TopologyError> {
        if self.is_empty() {
            return Err(TopologyError::EmptyStage { stage: self.stage });
        }

        let names = self.group_names();
        for (name, group) in names.iter().zip(self.groups.iter()) {
            group.try_validate_named(name)?;
        }

        for idx in 1..self.groups.len() {
            let prev = &self.groups[idx - 1];
            let curr = &self.groups[idx];
            if prev.planes() != curr.in_planes() {
                return Err(TopologyError::ChannelChain {
                    from: names[idx - 1].clone(),
                    out_channels: prev.planes(),
                    to: names[idx].clone(),
                    in_channels: curr.in_planes(),
                });
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize a new [`ResidualStage`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResidualStage<B> {
        self.expect_valid();

        ResidualStage {
            stage: self.stage,
            groups: self
                .groups
                .into_iter()
                .map(|group| group.init(device))
                .collect(),
        }
    }
}

/// Residual stage.
#[derive(Module, Debug)]
pub struct ResidualStage<B: Backend> {
    /// Stage number.
    pub stage: usize,

    /// Internal groups.
    pub groups: Vec<ResidualGroup<B>>,
}

impl<B: Backend> ResidualStage<B> {
    /// The number of input feature planes.
    pub fn in_planes(&self) -> usize {
        self.groups[0].in_planes()
    }

    /// The number of output feature planes.
    pub fn out_planes(&self) -> usize {
        self.groups[self.groups.len() - 1].planes()
    }

    /// Get the effective stride of the groups.
    pub fn stride(&self) -> usize {
        self.groups
            .iter()
            .fold(1, |acc, group| acc * group.stride())
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }

    /// Apply the stage.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_planes",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );

        let x = self.groups.iter().fold(input, |x, group| group.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}

impl<B: Backend> NamedParameters<B> for ResidualStage<B> {
    /// Groups are named absolutely; `prefix` is ignored.
    fn export_named(
        &self,
        _prefix: &str,
        out: &mut ParameterMap,
    ) {
        for (idx, group) in self.groups.iter().enumerate() {
            group.export_named(&residual_group_name(self.stage, idx), out);
        }
    }

    fn load_named(
        self,
        _prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        let stage = self.stage;
        let groups = self
            .groups
            .into_iter()
            .enumerate()
            .map(|(idx, group)| group.load_named(&residual_group_name(stage, idx), params))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResidualStage { stage, groups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_stage_table() {
        let groups: usize = FEATURE_NET_STAGES.iter().map(|s| s.depth).sum();
        assert_eq!(groups, 16);

        // Chained channels.
        for pair in FEATURE_NET_STAGES.windows(2) {
            assert_eq!(pair[0].planes, pair[1].in_planes);
        }
    }

    #[test]
    fn test_stage_from_spec() {
        let config = ResidualStageConfig::from_spec(&FEATURE_NET_STAGES[3]);
        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 64);
        assert_eq!(config.out_planes(), 128);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.group_names(), vec!["res5a", "res5b", "res5c"]);
        assert_eq!(config.try_validate(), Ok(()));

        let first = &config.groups[0];
        assert!(first.shortcut);
        assert_eq!(first.dilation, 2);
        assert_eq!(first.first_dilation, Some(1));

        let rest = &config.groups[1];
        assert!(!rest.shortcut);
        assert_eq!(rest.effective_first_dilation(), 2);

        let config = ResidualStageConfig::from_spec(&FEATURE_NET_STAGES[1]);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.groups[0].first_dilation, None);
        assert_eq!(config.groups[1].stride, 1);
    }

    #[test]
    fn test_stage_validation() {
        assert_eq!(
            ResidualStageConfig::new(3, vec![]).try_validate(),
            Err(TopologyError::EmptyStage { stage: 3 })
        );

        let config = ResidualStageConfig::new(
            4,
            vec![
                ResidualGroupConfig::new(32, 64)
                    .with_stride(2)
                    .with_shortcut(true),
                ResidualGroupConfig::new(32, 32),
            ],
        );
        assert_eq!(
            config.try_validate(),
            Err(TopologyError::ChannelChain {
                from: "res4a".to_string(),
                out_channels: 64,
                to: "res4b".to_string(),
                in_channels: 32,
            })
        );

        let config = ResidualStageConfig::new(3, vec![ResidualGroupConfig::new(16, 32)]);
        assert!(matches!(
            config.try_validate(),
            Err(TopologyError::MissingShortcut { group, .. }) if group == "res3a"
        ));
    }

    #[test]
    #[should_panic(expected = "stage 2 has no residual groups")]
    fn test_stage_init_panics_on_empty() {
        let device = Default::default();
        let _: ResidualStage<B> = ResidualStageConfig::new(2, vec![]).init(&device);
    }

    #[test]
    fn test_stage_forward() {
        let device = Default::default();
        let stage: ResidualStage<B> = ResidualStageConfig::new(
            3,
            vec![
                ResidualGroupConfig::new(4, 8)
                    .with_stride(2)
                    .with_shortcut(true),
                ResidualGroupConfig::new(8, 8),
            ],
        )
        .init(&device);

        assert_eq!(stage.in_planes(), 4);
        assert_eq!(stage.out_planes(), 8);
        assert_eq!(stage.stride(), 2);
        assert_eq!(stage.output_resolution([16, 8]), [8, 4]);

        let input = Tensor::random([2, 4, 16, 8], Distribution::Default, &device);
        let output = stage.forward(input);
        assert_shape_contract!(
            ["batch", "planes", "height", "width"],
            &output,
            &[("batch", 2), ("planes", 8), ("height", 8), ("width", 4)],
        );
    }

    #[test]
    fn test_stage_parameter_names() {
        let device = Default::default();
        let stage: ResidualStage<B> =
            ResidualStageConfig::from_spec(&FEATURE_NET_STAGES[0]).init(&device);

        let params = stage.export_parameters();
        // 3 groups * 2 blocks + 1 shortcut, 5 tensors each.
        assert_eq!(params.len(), 7 * 5);
        assert!(params.contains_key("res2a_branch1.conv.weight"));
        assert!(params.contains_key("res2c_branch2b.beta"));
        assert!(!params.contains_key("res2b_branch1.conv.weight"));

        let stage = stage.load_parameters(&params).unwrap();
        assert_eq!(stage.groups.len(), 3);
    }
}
