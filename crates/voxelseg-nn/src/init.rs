use rand::rngs::StdRng;
use voxelseg_core::{Float, Tensor};

use crate::conv::{Conv2d, Conv3d, ConvTranspose2d};
use crate::norm::{BatchNorm2d, BatchNorm3d};

/// A mutable view of one parameterized layer, tagged by kind. The
/// post-construction initialization pass visits every layer of an assembled
/// network through this enum and dispatches on the tag.
pub enum LayerMut<'a, T: Float> {
    Conv2d(&'a mut Conv2d<T>),
    Conv3d(&'a mut Conv3d<T>),
    ConvTranspose2d(&'a mut ConvTranspose2d<T>),
    Norm2d(&'a mut BatchNorm2d<T>),
    Norm3d(&'a mut BatchNorm3d<T>),
}

/// He-normal tensor: standard normal scaled by sqrt(2 / fan_in), the
/// standard scheme for rectified-linear networks.
pub fn he_normal<T: Float>(shape: Vec<usize>, fan_in: usize, rng: &mut StdRng) -> Tensor<T> {
    let std = T::from_f64((2.0 / fan_in as f64).sqrt());
    Tensor::randn_using(shape, rng).apply(|v| v * std)
}

/// Initialize a single layer in place: He-normal weights and zero bias for
/// convolutions, identity affine (weight 1, bias 0) and fresh running
/// statistics for normalization layers.
pub fn init_layer<T: Float>(layer: LayerMut<'_, T>, rng: &mut StdRng) {
    match layer {
        LayerMut::Conv2d(conv) => {
            let k = conv.kernel_size;
            let fan_in = conv.in_channels * k * k;
            conv.weight = he_normal(conv.weight.shape_vec(), fan_in, rng);
            if let Some(b) = conv.bias.as_mut() {
                *b = Tensor::zeros(b.shape_vec());
            }
        }
        LayerMut::Conv3d(conv) => {
            let k = conv.kernel_size;
            let fan_in = conv.in_channels * k * k * k;
            conv.weight = he_normal(conv.weight.shape_vec(), fan_in, rng);
            if let Some(b) = conv.bias.as_mut() {
                *b = Tensor::zeros(b.shape_vec());
            }
        }
        LayerMut::ConvTranspose2d(conv) => {
            let k = conv.kernel_size;
            let fan_in = conv.in_channels * k * k;
            conv.weight = he_normal(conv.weight.shape_vec(), fan_in, rng);
            if let Some(b) = conv.bias.as_mut() {
                *b = Tensor::zeros(b.shape_vec());
            }
        }
        LayerMut::Norm2d(norm) => {
            let n = norm.0.num_features;
            norm.0.weight = Tensor::ones(vec![n]);
            norm.0.bias = Tensor::zeros(vec![n]);
            norm.0.running_mean = Tensor::zeros(vec![n]);
            norm.0.running_var = Tensor::ones(vec![n]);
        }
        LayerMut::Norm3d(norm) => {
            let n = norm.0.num_features;
            norm.0.weight = Tensor::ones(vec![n]);
            norm.0.bias = Tensor::zeros(vec![n]);
            norm.0.running_mean = Tensor::zeros(vec![n]);
            norm.0.running_var = Tensor::ones(vec![n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_he_normal_variance() {
        let mut rng = StdRng::seed_from_u64(11);
        let fan_in = 32 * 27;
        let t: Tensor<f64> = he_normal(vec![64, 32, 3, 3, 3], fan_in, &mut rng);
        let n = t.numel() as f64;
        let mean: f64 = t.data().iter().sum::<f64>() / n;
        let var: f64 = t.data().iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let expected = 2.0 / fan_in as f64;
        assert!(mean.abs() < 1e-3);
        assert!((var - expected).abs() / expected < 0.1);
    }

    #[test]
    fn test_init_conv_nonconstant_weights_zero_bias() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut conv: Conv2d<f64> = Conv2d::new(4, 8, 3, 1, 1, true);
        init_layer(LayerMut::Conv2d(&mut conv), &mut rng);
        let first = conv.weight.data()[0];
        assert!(conv.weight.data().iter().any(|&v| v != first));
        assert!(conv.bias.as_ref().unwrap().data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_init_norm_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut bn: BatchNorm3d<f64> = BatchNorm3d::new(16);
        // perturb, then re-initialize
        bn.0.weight = Tensor::full(vec![16], 3.0);
        bn.0.running_var = Tensor::full(vec![16], 5.0);
        init_layer(LayerMut::Norm3d(&mut bn), &mut rng);
        assert!(bn.0.weight.data().iter().all(|&v| v == 1.0));
        assert!(bn.0.bias.data().iter().all(|&v| v == 0.0));
        assert!(bn.0.running_mean.data().iter().all(|&v| v == 0.0));
        assert!(bn.0.running_var.data().iter().all(|&v| v == 1.0));
    }
}
