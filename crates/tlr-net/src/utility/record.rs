//! # Parameter Summaries
//!
//! Human-readable views of a [`ParameterMap`], for diffing checkpoints
//! against the names and shapes a model expects.

use crate::utility::params::ParameterMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Shape and dtype of one parameter; values are elided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSummary {
    /// Tensor shape.
    #[serde(rename = "_shape")]
    pub shape: Vec<usize>,

    /// Element type, as burn names it.
    pub dtype: String,
}

/// Summarize every parameter of a set, by name.
pub fn summarize_parameters(params: &ParameterMap) -> BTreeMap<String, ParameterSummary> {
    params
        .iter()
        .map(|(name, data)| {
            let summary = ParameterSummary {
                shape: data.shape.clone(),
                dtype: format!("{:?}", data.dtype),
            };
            (name.clone(), summary)
        })
        .collect()
}

/// Describe a parameter set as JSON.
///
/// Each parameter becomes ``{"_shape": [...], "dtype": "..."}``.
pub fn describe_parameters(params: &ParameterMap) -> serde_json::Result<Value> {
    serde_json::to_value(summarize_parameters(params))
}

/// Total number of scalar values in a parameter set.
pub fn count_parameters(params: &ParameterMap) -> usize {
    params
        .values()
        .map(|data| data.shape.iter().product::<usize>())
        .sum()
}
