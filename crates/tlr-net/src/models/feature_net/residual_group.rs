//! # Residual Group
//!
//! A [`ResidualGroup`] is the repeating unit of the [`super::feature_net_model::FeatureNet`]
//! backbone:
//!
//! ```text
//! b2a = relu(branch2a(x))
//! b2b = branch2b(b2a)
//! sc  = branch1(x)  or  x
//! out = relu(sc + b2b)
//! ```
//!
//! ``branch2a`` carries the group stride (and the optional first dilation);
//! ``branch1`` is a ``1x1`` shortcut projection with the same stride.
//!
//! [`ResidualGroupMeta`] defines a common meta API for [`ResidualGroup`]
//! and [`ResidualGroupConfig`].

use crate::errors::{ParamError, TopologyError};
use crate::layers::blocks::conv_bn_scale::{ConvBnScale2d, ConvBnScale2dConfig, ConvBnScale2dMeta};
use crate::models::feature_net::util::{CONV_INTO_RELU_INITIALIZER, stride_div_output_resolution};
use crate::utility::params::{NamedParameters, ParameterMap};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::Conv2dConfig;
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ResidualGroup`] Meta trait.
pub trait ResidualGroupMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn planes(&self) -> usize;

    /// The stride of the group.
    fn stride(&self) -> usize;

    /// Dilation rate for the second branch conv.
    fn dilation(&self) -> usize;

    /// Optional dilation rate for the first branch conv.
    fn first_dilation(&self) -> Option<usize>;

    /// Does the group have a projection shortcut?
    fn has_shortcut(&self) -> bool;

    /// Effective first dilation.
    ///
    /// Resolves `first_dilation()` vrs `dilation()`.
    fn effective_first_dilation(&self) -> usize {
        self.first_dilation().unwrap_or(self.dilation())
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }
}

/// [`ResidualGroup`] Config.
///
/// Implements [`ResidualGroupMeta`].
#[derive(Config, Debug)]
pub struct ResidualGroupConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub planes: usize,

    /// The stride of the group.
    #[config(default = 1)]
    pub stride: usize,

    /// Dilation rate for the second branch conv.
    #[config(default = 1)]
    pub dilation: usize,

    /// Optional dilation rate for the first branch conv.
    #[config(default = "None")]
    pub first_dilation: Option<usize>,

    /// Use a ``1x1`` projection shortcut.
    #[config(default = false)]
    pub shortcut: bool,

    /// Normalization numeric stability term.
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl ResidualGroupMeta for ResidualGroupConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn dilation(&self) -> usize {
        self.dilation
    }

    fn first_dilation(&self) -> Option<usize> {
        self.first_dilation
    }

    fn has_shortcut(&self) -> bool {
        self.shortcut
    }
}

impl ResidualGroupConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), TopologyError> {
        self.try_validate_named("residual group")
    }

    /// Check if the config is valid, naming the group in errors.
    pub fn try_validate_named(
        &self,
        name: &str,
    ) -> Result<(), TopologyError> {
        if !self.shortcut && (self.in_planes != self.planes || self.stride != 1) {
            return Err(TopologyError::MissingShortcut {
                group: name.to_string(),
                in_channels: self.in_planes,
                out_channels: self.planes,
                stride: self.stride,
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

    /// Initialize a [`ResidualGroup`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResidualGroup<B> {
        self.expect_valid();

        let stride = self.stride;
        let first_dilation = self.effective_first_dilation();
        let dilation = self.dilation;

        let branch1 = self.shortcut.then(|| {
            ConvBnScale2dConfig::from(
                Conv2dConfig::new([self.in_planes, self.planes], [1, 1])
                    .with_stride([stride, stride])
                    .with_bias(false),
            )
            .with_epsilon(self.epsilon)
        });

        let branch2a = ConvBnScale2dConfig::from(
            Conv2dConfig::new([self.in_planes, self.planes], [3, 3])
                .with_stride([stride, stride])
                .with_dilation([first_dilation, first_dilation])
                .with_padding(PaddingConfig2d::Explicit(first_dilation, first_dilation))
                .with_bias(false)
                .with_initializer(CONV_INTO_RELU_INITIALIZER.clone()),
        )
        .with_epsilon(self.epsilon);

        let branch2b = ConvBnScale2dConfig::from(
            Conv2dConfig::new([self.planes, self.planes], [3, 3])
                .with_dilation([dilation, dilation])
                .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
                .with_bias(false),
        )
        .with_epsilon(self.epsilon);

        ResidualGroup {
            branch1: branch1.map(|cfg| cfg.init(device)),
            branch2a: branch2a.init(device),
            branch2b: branch2b.init(device),
            act: Relu,
        }
    }
}

/// Residual Group.
///
/// Implements [`ResidualGroupMeta`].
#[derive(Module, Debug)]
pub struct ResidualGroup<B: Backend> {
    /// Optional projection shortcut.
    pub branch1: Option<ConvBnScale2d<B>>,

    /// First branch block.
    pub branch2a: ConvBnScale2d<B>,

    /// Second branch block.
    pub branch2b: ConvBnScale2d<B>,

    /// Activation.
    pub act: Relu,
}

impl<B: Backend> ResidualGroupMeta for ResidualGroup<B> {
    fn in_planes(&self) -> usize {
        self.branch2a.in_channels()
    }

    fn planes(&self) -> usize {
        self.branch2b.out_channels()
    }

    fn stride(&self) -> usize {
        self.branch2a.stride()[0]
    }

    fn dilation(&self) -> usize {
        self.branch2b.dilation()[0]
    }

    fn first_dilation(&self) -> Option<usize> {
        let d1 = self.branch2a.dilation()[0];
        let d2 = self.branch2b.dilation()[0];
        if d1 == d2 { None } else { Some(d1) }
    }

    fn has_shortcut(&self) -> bool {
        self.branch1.is_some()
    }
}

impl<B: Backend> ResidualGroup<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.act.forward(self.forward_pre_activation(input))
    }

    /// Forward Pass, without the final activation.
    ///
    /// Returns ``shortcut + branch2b``.
    pub fn forward_pre_activation(
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

        let identity = match &self.branch1 {
            Some(branch1) => branch1.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.act.forward(self.branch2a.forward(input));
        let x = self.branch2b.forward(x);

        bimm_contracts::define_shape_contract!(
            OUT_CONTRACT,
            ["batch", "planes", "out_height", "out_width"],
        );
        let out_bindings = [
            ("batch", batch),
            ("planes", self.planes()),
            ("out_height", out_height),
            ("out_width", out_width),
        ];
        assert_shape_contract_periodically!(OUT_CONTRACT, &identity, &out_bindings);
        assert_shape_contract_periodically!(OUT_CONTRACT, &x, &out_bindings);

        identity + x
    }
}

/// Join a branch name onto a group prefix: ``res2a`` + ``branch1`` = ``res2a_branch1``.
fn branch_name(
    prefix: &str,
    branch: &str,
) -> String {
    if prefix.is_empty() {
        branch.to_string()
    } else {
        format!("{prefix}_{branch}")
    }
}

impl<B: Backend> NamedParameters<B> for ResidualGroup<B> {
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    ) {
        if let Some(branch1) = &self.branch1 {
            branch1.export_named(&branch_name(prefix, "branch1"), out);
        }
        self.branch2a
            .export_named(&branch_name(prefix, "branch2a"), out);
        self.branch2b
            .export_named(&branch_name(prefix, "branch2b"), out);
    }

    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        Ok(ResidualGroup {
            branch1: match self.branch1 {
                Some(branch1) => Some(branch1.load_named(&branch_name(prefix, "branch1"), params)?),
                None => None,
            },
            branch2a: self
                .branch2a
                .load_named(&branch_name(prefix, "branch2a"), params)?,
            branch2b: self
                .branch2b
                .load_named(&branch_name(prefix, "branch2b"), params)?,
            act: self.act,
        })
    }
}
