//! # Named Parameter Ingestion
//!
//! Externally trained parameters are exchanged as a flat [`ParameterMap`],
//! keyed by dotted names which mirror the layer names of the reference
//! network (``conv1.bn.running_mean``, ``res3a_branch2b.gamma``, ...).
//!
//! [`NamedParameters`] is implemented by every module of the network;
//! loading consumes entries from the map, so anything left over after a
//! full load was not claimed by the model.

use crate::errors::ParamError;
use burn::module::{Param, RunningState};
use burn::nn::conv::{Conv2d, ConvTranspose2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use std::collections::BTreeMap;

/// Flat map of named parameter values.
pub type ParameterMap = BTreeMap<String, TensorData>;

/// Join a parameter path.
///
/// An empty prefix yields the bare name.
pub fn join_name(
    prefix: &str,
    name: &str,
) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Remove and validate a named tensor from `params`.
///
/// # Errors
///
/// * [`ParamError::Missing`] if `name` is absent.
/// * [`ParamError::ShapeMismatch`] if the supplied shape is not `expected`;
///   no broadcasting is attempted.
pub fn take_tensor<B: Backend, const D: usize>(
    params: &mut ParameterMap,
    name: &str,
    expected: [usize; D],
    device: &B::Device,
) -> Result<Tensor<B, D>, ParamError> {
    let data = params.remove(name).ok_or_else(|| ParamError::Missing {
        name: name.to_string(),
    })?;

    if data.shape.as_slice() != expected.as_slice() {
        return Err(ParamError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            actual: data.shape.clone(),
        });
    }

    Ok(Tensor::from_data(data, device))
}

/// Replace the value of a [`Param`], validating against its current shape.
pub fn load_param<B: Backend, const D: usize>(
    param: Param<Tensor<B, D>>,
    params: &mut ParameterMap,
    name: &str,
) -> Result<Param<Tensor<B, D>>, ParamError> {
    let device = param.device();
    let value = take_tensor::<B, D>(params, name, param.dims(), &device)?;
    Ok(param.map(|_| value))
}

/// Replace the value of a [`RunningState`], validating against its current shape.
pub fn load_running_state<B: Backend, const D: usize>(
    state: RunningState<Tensor<B, D>>,
    params: &mut ParameterMap,
    name: &str,
) -> Result<RunningState<Tensor<B, D>>, ParamError> {
    let current = state.value();
    let value = take_tensor::<B, D>(params, name, current.dims(), &current.device())?;
    Ok(RunningState::new(value))
}

/// Modules with a stable, externally addressable parameter naming.
pub trait NamedParameters<B: Backend>: Sized {
    /// Insert every parameter of this module into `out`, under `prefix`.
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    );

    /// Consume this module's parameters from `params`, under `prefix`.
    ///
    /// # Errors
    ///
    /// A [`ParamError`] for the first missing or mis-shaped parameter.
    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError>;

    /// Export all parameters as a fresh [`ParameterMap`].
    fn export_parameters(&self) -> ParameterMap {
        let mut out = ParameterMap::new();
        self.export_named("", &mut out);
        out
    }

    /// Load a complete parameter set.
    ///
    /// Every parameter of the module must be supplied, and every supplied
    /// parameter must be consumed.
    ///
    /// # Errors
    ///
    /// * [`ParamError::Missing`] / [`ParamError::ShapeMismatch`] from the modules.
    /// * [`ParamError::Unexpected`] for the first unclaimed entry.
    fn load_parameters(
        self,
        params: &ParameterMap,
    ) -> Result<Self, ParamError> {
        let mut remaining = params.clone();
        let module = self.load_named("", &mut remaining)?;
        if let Some(name) = remaining.keys().next() {
            return Err(ParamError::Unexpected { name: name.clone() });
        }
        log::debug!("loaded {} named parameters", params.len());
        Ok(module)
    }
}

impl<B: Backend> NamedParameters<B> for Conv2d<B> {
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    ) {
        out.insert(join_name(prefix, "weight"), self.weight.val().into_data());
        if let Some(bias) = &self.bias {
            out.insert(join_name(prefix, "bias"), bias.val().into_data());
        }
    }

    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        let mut module = self;
        module.weight = load_param(module.weight, params, &join_name(prefix, "weight"))?;
        module.bias = match module.bias {
            Some(bias) => Some(load_param(bias, params, &join_name(prefix, "bias"))?),
            None => None,
        };
        Ok(module)
    }
}

impl<B: Backend> NamedParameters<B> for ConvTranspose2d<B> {
    fn export_named(
        &self,
        prefix: &str,
        out: &mut ParameterMap,
    ) {
        out.insert(join_name(prefix, "weight"), self.weight.val().into_data());
        if let Some(bias) = &self.bias {
            out.insert(join_name(prefix, "bias"), bias.val().into_data());
        }
    }

    fn load_named(
        self,
        prefix: &str,
        params: &mut ParameterMap,
    ) -> Result<Self, ParamError> {
        let mut module = self;
        module.weight = load_param(module.weight, params, &join_name(prefix, "weight"))?;
        module.bias = match module.bias {
            Some(bias) => Some(load_param(bias, params, &join_name(prefix, "bias"))?),
            None => None,
        };
        Ok(module)
    }
}
