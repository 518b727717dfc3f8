//! # `FeatureNet` Utilities
use bimm_contracts::unpack_shape_contract;
use burn::nn::Initializer;

/// Initializer for convolutions which feed into ``relu`` activations.
pub static CONV_INTO_RELU_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: std::f64::consts::SQRT_2,
    fan_out_only: true,
};

/// Get the output resolution for a given input resolution.
///
/// The input must be a multiple of the stride.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in=height_out*stride, width_in=width_out*stride]``.
///
/// # Returns
///
/// ``[height_out, width_out]``
///
/// # Panics
///
/// If the input resolution is not a multiple of the stride.
#[inline(always)]
pub fn stride_div_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    unpack_shape_contract!(
        [
            "height_in" = "height_out" * "stride",
            "width_in" = "width_out" * "stride"
        ],
        &input_resolution,
        &["height_out", "width_out"],
        &[("stride", stride)]
    )
}

/// The layer name of a residual group.
///
/// Groups are lettered within their stage: ``res2a``, ``res2b``, ...
///
/// # Panics
///
/// If `index` is past ``z``.
pub fn residual_group_name(
    stage: usize,
    index: usize,
) -> String {
    assert!(index < 26, "residual group index out of range: {index}");
    format!("res{stage}{}", (b'a' + index as u8) as char)
}
