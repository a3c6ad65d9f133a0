use voxelseg_core::{Float, Tensor, TensorError, TensorResult};
use voxelseg_nn::{ConvTranspose2d, LayerMut};

/// Central index along a depth axis: exact midpoint for odd depth, the
/// slice immediately past the midpoint for even depth.
pub fn central_index(depth: usize) -> usize {
    depth / 2
}

/// Up-convolution with skip fusion: a 2x2 stride-2 transposed convolution
/// doubles the 2D input's resolution, then the central slice of the 3D skip
/// volume is concatenated in front of it along the channel axis.
pub struct UpConv<T: Float> {
    pub transconv: ConvTranspose2d<T>,
}

impl<T: Float> UpConv<T> {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        UpConv {
            transconv: ConvTranspose2d::new(in_channels, out_channels, 2, 2, true),
        }
    }

    pub fn forward(&self, skip: &Tensor<T>, x: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if skip.ndim() != 5 {
            return Err(TensorError::DimensionMismatch(format!(
                "skip tensor must be a rank-5 volume, got rank {}",
                skip.ndim()
            )));
        }
        let depth = skip.shape().dim(2)?;
        let skip_slice = skip.select(2, central_index(depth))?;
        let up = self.transconv.forward(x)?;
        // skip channels first; mismatched spatial dims fail here
        Tensor::concatenate(&[&skip_slice, &up], 1)
    }

    pub fn visit_layers(&mut self, f: &mut dyn FnMut(LayerMut<'_, T>)) {
        f(LayerMut::ConvTranspose2d(&mut self.transconv));
    }
}
