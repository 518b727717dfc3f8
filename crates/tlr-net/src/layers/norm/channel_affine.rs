//! # `ChannelAffine` - learned per-channel scale and shift.
//!
//! ```text
//! y = x * gamma + beta
//! ```
//!
//! `gamma` and `beta` are broadcast across batch, height, and width.

use crate::errors::ParamError;
use crate::utility::params::{NamedParameters, ParameterMap, join_name, load_param};
use bimm_contracts::unpack_shape_contract;
use burn::module::Param;
use burn::nn::Initializer;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ChannelAffine`] Config.
#[derive(Config, Debug)]
pub struct ChannelAffineConfig {
    /// Number of channels.
    pub num_features: usize,
}

impl ChannelAffineConfig {
    /// Initialize a [`ChannelAffine`] at the identity (``gamma=1, beta=0``).
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ChannelAffine<B> {
        ChannelAffine {
            gamma: Initializer::Ones.init([self.num_features], device),
            beta: Initializer::Zeros.init([self.num_features], device),
        }
    }
}

/// Per-channel affine transform.
#[derive(Module, Debug)]
pub struct ChannelAffine<B: Backend> {
    /// Per-channel scale.
    pub gamma: Param<Tensor<B, 1>>,

    /// Per-channel shift.
    pub beta: Param<Tensor<B, 1>>,
}

impl<B: Backend> ChannelAffine<B> {
    /// Number of channels.
    pub fn num_features(&self) -> usize {
        self.gamma.dims()[0]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, num_features, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_features, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [num_features] = unpack_shape_contract!(
            ["batch", "num_features", "height", "width"],
            &input,
            &["num_features"],
            &[("num_features", self.num_features())]
        );
        let shape = [1, num_features, 1, 1];

        input
            .mul(self.gamma.val().reshape(shape))
            .add(self.beta.val().reshape(shape))
    }
}

impl<B: Backend> NamedParameters<B> for ChannelAffine<B> {
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    ) {
        out.insert(join_name(prefix, "gamma"), self.gamma.val().into_data());
        out.insert(join_name(prefix, "beta"), self.beta.val().into_data());
    }

    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        Ok(ChannelAffine {
            gamma: load_param(self.gamma, params, &join_name(prefix, "gamma"))?,
            beta: load_param(self.beta, params, &join_name(prefix, "beta"))?,
        })
    }
}
