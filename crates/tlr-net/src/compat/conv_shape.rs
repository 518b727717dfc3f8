//! # Convolution Shape Utilities
//!
//! Utilities for computing the output shape of convolution, transposed
//! convolution, and pooling operations.
//!
//! Pooling shares the convolution arithmetic; all sizes round with `floor`.

use burn::nn::PaddingConfig2d;

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
///   visual explanations of these convolution parameters.
/// - [pytorch conv1d](https://docs.pytorch.org/docs/stable/generated/torch.nn.Conv1d.html)
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding of the convolution, added evenly to all sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let effective_size = input_size + 2 * padding;
    let pos = effective_size + stride;
    let kernel_width = 1 + dilation * (kernel_size - 1);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Predict the output size of a 1D convolution operation.
///
/// This is the ``panic``-ing variant of [`maybe_conv1d_output_size`].
///
/// # Panics
///
/// If the output size would be <= 0.
pub fn expect_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> usize {
    match maybe_conv1d_output_size(input_size, kernel_size, stride, padding, dilation) {
        Some(x) => x,
        None => panic!(
            "No legal output size for conv1d with:\n input_size:{input_size}\n kernel_size:{kernel_size}\n stride:{stride}\n dilation:{dilation}\n padding:{padding}",
        ),
    }
}

/// Predict the output size of a 1D transposed convolution operation.
///
/// ```text
/// out_size = (in_size - 1)*stride - 2*padding + dilation*(kernel_size-1) + padding_out + 1
/// ```
///
/// # Reference
///
/// - [pytorch conv_transpose1d](https://docs.pytorch.org/docs/stable/generated/torch.nn.ConvTranspose1d.html)
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv_transpose1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
    padding_out: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let full = (input_size - 1) * stride + dilation * (kernel_size - 1) + padding_out + 1;
    if full <= 2 * padding {
        None
    } else {
        Some(full - 2 * padding)
    }
}

/// Predict the output shape of a D convolution operation.
///
/// This is the generalization of [`maybe_conv1d_output_size`] to D dimensions.
///
/// # Returns
///
/// An `Option<[usize; D]>` representing the output shape; or `None` for <= 0.
pub fn maybe_conv_output_shape<const D: usize>(
    input_shape: [usize; D],
    kernel_shape: [usize; D],
    stride: [usize; D],
    padding: [usize; D],
    dilation: [usize; D],
) -> Option<[usize; D]> {
    let mut output_shape = input_shape;
    for i in 0..D {
        output_shape[i] = maybe_conv1d_output_size(
            input_shape[i],
            kernel_shape[i],
            stride[i],
            padding[i],
            dilation[i],
        )?;
    }
    Some(output_shape)
}

/// Predict the output shape of a D convolution operation.
///
/// This is the ``panic``-ing variant of [`maybe_conv_output_shape`].
///
/// # Panics
///
/// If any output dimension would be <= 0.
pub fn expect_conv_output_shape<const D: usize>(
    input_shape: [usize; D],
    kernel_shape: [usize; D],
    stride: [usize; D],
    padding: [usize; D],
    dilation: [usize; D],
) -> [usize; D] {
    let mut output_shape = input_shape;
    for i in 0..D {
        output_shape[i] = expect_conv1d_output_size(
            input_shape[i],
            kernel_shape[i],
            stride[i],
            padding[i],
            dilation[i],
        );
    }
    output_shape
}

/// Predict the output shape of a D transposed convolution operation.
///
/// This is the generalization of [`maybe_conv_transpose1d_output_size`] to D dimensions.
pub fn maybe_conv_transpose_output_shape<const D: usize>(
    input_shape: [usize; D],
    kernel_shape: [usize; D],
    stride: [usize; D],
    padding: [usize; D],
    dilation: [usize; D],
    padding_out: [usize; D],
) -> Option<[usize; D]> {
    let mut output_shape = input_shape;
    for i in 0..D {
        output_shape[i] = maybe_conv_transpose1d_output_size(
            input_shape[i],
            kernel_shape[i],
            stride[i],
            padding[i],
            dilation[i],
            padding_out[i],
        )?;
    }
    Some(output_shape)
}

/// Resolve a [`PaddingConfig2d`] to explicit ``[height, width]`` padding.
///
/// `Same` padding resolves to the symmetric padding which preserves the
/// resolution at stride 1; it requires an odd effective kernel.
///
/// # Panics
///
/// If `Same` padding is requested for an even effective kernel.
pub fn explicit_padding_2d(
    padding: &PaddingConfig2d,
    kernel_size: [usize; 2],
    dilation: [usize; 2],
) -> [usize; 2] {
    match padding {
        PaddingConfig2d::Explicit(height, width) => [*height, *width],
        PaddingConfig2d::Valid => [0, 0],
        PaddingConfig2d::Same => {
            let mut padding = [0; 2];
            for i in 0..2 {
                let span = dilation[i] * (kernel_size[i] - 1);
                assert!(
                    span % 2 == 0,
                    "Same padding requires an odd effective kernel: kernel_size:{kernel_size:?} dilation:{dilation:?}"
                );
                padding[i] = span / 2;
            }
            padding
        }
    }
}
