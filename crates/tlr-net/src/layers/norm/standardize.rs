//! # `Standardize2d` - affine-free batch normalization.
//!
//! A [`Standardize2d`] layer applies inference-mode batch normalization
//! without any learned scale or shift:
//!
//! ```text
//! y = (x - running_mean) / sqrt(running_var + epsilon)
//! ```
//!
//! The running statistics are tracked as [`RunningState`]s, and are never
//! updated by [`Standardize2d::forward`].
//!
//! Pair with [`crate::layers::norm::channel_affine::ChannelAffine`] to obtain
//! a conventional batch norm; the two are kept as separate parameter groups.

use crate::errors::ParamError;
use crate::utility::params::{NamedParameters, ParameterMap, join_name, load_running_state};
use bimm_contracts::unpack_shape_contract;
use burn::module::RunningState;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Standardize2d`] Config.
#[derive(Config, Debug)]
pub struct Standardize2dConfig {
    /// Number of channels.
    pub num_features: usize,

    /// Numeric stability term, added to the variance.
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl Standardize2dConfig {
    /// Initialize a [`Standardize2d`].
    ///
    /// Statistics start at ``mean=0, var=1``.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Standardize2d<B> {
        Standardize2d {
            running_mean: RunningState::new(Tensor::zeros([self.num_features], device)),
            running_var: RunningState::new(Tensor::ones([self.num_features], device)),
            epsilon: self.epsilon,
        }
    }
}

/// Affine-free, inference-mode batch normalization.
#[derive(Module, Debug)]
pub struct Standardize2d<B: Backend> {
    /// Per-channel mean.
    pub running_mean: RunningState<Tensor<B, 1>>,

    /// Per-channel variance.
    pub running_var: RunningState<Tensor<B, 1>>,

    /// Numeric stability term.
    pub epsilon: f64,
}

impl<B: Backend> Standardize2d<B> {
    /// Number of channels.
    pub fn num_features(&self) -> usize {
        self.running_mean.value().dims()[0]
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
        let mean = self.running_mean.value().reshape(shape);
        let std = self
            .running_var
            .value()
            .add_scalar(self.epsilon)
            .sqrt()
            .reshape(shape);

        input.sub(mean).div(std)
    }
}

impl<B: Backend> NamedParameters<B> for Standardize2d<B> {
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    ) {
        out.insert(
            join_name(prefix, "running_mean"),
            self.running_mean.value().into_data(),
        );
        out.insert(
            join_name(prefix, "running_var"),
            self.running_var.value().into_data(),
        );
    }

    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        Ok(Standardize2d {
            running_mean: load_running_state(
                self.running_mean,
                params,
                &join_name(prefix, "running_mean"),
            )?,
            running_var: load_running_state(
                self.running_var,
                params,
                &join_name(prefix, "running_var"),
            )?,
            epsilon: self.epsilon,
        })
    }
}
