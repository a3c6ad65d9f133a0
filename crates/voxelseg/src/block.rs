use voxelseg_core::{Float, Tensor, TensorResult};
use voxelseg_nn::{BatchNorm2d, BatchNorm3d, Conv2d, Conv3d, Dropout, LayerMut};

/// Shortcut path of a 3D residual block, fixed at construction: identity
/// when stride and channel count are unchanged, otherwise a strided
/// projection convolution followed by a norm so the addition shapes match.
pub enum Shortcut3d<T: Float> {
    Identity,
    Projection {
        conv: Conv3d<T>,
        norm: BatchNorm3d<T>,
    },
}

/// Pre-activation 3D residual block: norm -> relu -> conv (strided) ->
/// norm -> relu -> conv -> dropout -> add shortcut.
///
/// Height and width are always padded; depth is padded only at stride 1.
/// Downsampling therefore shrinks the depth axis symmetrically around its
/// center, which keeps the central slice of the volume well-defined for the
/// later skip fusion.
pub struct ResBlock3d<T: Float> {
    pub bn1: BatchNorm3d<T>,
    pub conv1: Conv3d<T>,
    pub bn2: BatchNorm3d<T>,
    pub conv2: Conv3d<T>,
    pub dropout: Dropout,
    pub shortcut: Shortcut3d<T>,
}

impl<T: Float> ResBlock3d<T> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, p: f64) -> Self {
        let pad1 = if stride == 1 { (1, 1, 1) } else { (0, 1, 1) };
        let shortcut = if stride != 1 || in_channels != out_channels {
            Shortcut3d::Projection {
                conv: Conv3d::new(in_channels, out_channels, 3, stride, pad1, false),
                norm: BatchNorm3d::new(out_channels),
            }
        } else {
            Shortcut3d::Identity
        };
        ResBlock3d {
            bn1: BatchNorm3d::new(in_channels),
            conv1: Conv3d::new(in_channels, out_channels, 3, stride, pad1, true),
            bn2: BatchNorm3d::new(out_channels),
            conv2: Conv3d::new(out_channels, out_channels, 3, 1, (1, 1, 1), true),
            dropout: Dropout::new(p),
            shortcut,
        }
    }

    pub fn forward(&mut self, x: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let mut out = self.bn1.forward(x)?.relu();
        out = self.conv1.forward(&out)?;
        out = self.bn2.forward(&out)?.relu();
        out = self.conv2.forward(&out)?;
        out = self.dropout.forward(&out)?;

        let residual = match &mut self.shortcut {
            Shortcut3d::Identity => x.clone(),
            Shortcut3d::Projection { conv, norm } => norm.forward(&conv.forward(x)?)?,
        };
        out.add(&residual)
    }

    pub fn set_training(&mut self, training: bool) {
        self.bn1.0.training = training;
        self.bn2.0.training = training;
        self.dropout.training = training;
        if let Shortcut3d::Projection { norm, .. } = &mut self.shortcut {
            norm.0.training = training;
        }
    }

    pub fn visit_layers(&mut self, f: &mut dyn FnMut(LayerMut<'_, T>)) {
        f(LayerMut::Norm3d(&mut self.bn1));
        f(LayerMut::Conv3d(&mut self.conv1));
        f(LayerMut::Norm3d(&mut self.bn2));
        f(LayerMut::Conv3d(&mut self.conv2));
        if let Shortcut3d::Projection { conv, norm } = &mut self.shortcut {
            f(LayerMut::Conv3d(conv));
            f(LayerMut::Norm3d(norm));
        }
    }
}

/// Shortcut path of a 2D residual block. The projection convolution is 1x1.
pub enum Shortcut2d<T: Float> {
    Identity,
    Projection {
        conv: Conv2d<T>,
        norm: BatchNorm2d<T>,
    },
}

/// Pre-activation 2D residual block: norm -> relu -> conv (strided) ->
/// dropout -> norm -> relu -> conv -> dropout -> add shortcut.
pub struct ResBlock2d<T: Float> {
    pub bn1: BatchNorm2d<T>,
    pub conv1: Conv2d<T>,
    pub bn2: BatchNorm2d<T>,
    pub conv2: Conv2d<T>,
    pub dropout: Dropout,
    pub shortcut: Shortcut2d<T>,
}

impl<T: Float> ResBlock2d<T> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, p: f64) -> Self {
        let shortcut = if stride != 1 || in_channels != out_channels {
            Shortcut2d::Projection {
                conv: Conv2d::new(in_channels, out_channels, 1, stride, 0, false),
                norm: BatchNorm2d::new(out_channels),
            }
        } else {
            Shortcut2d::Identity
        };
        ResBlock2d {
            bn1: BatchNorm2d::new(in_channels),
            // the 3x3 convs feed a norm, so they carry no bias
            conv1: Conv2d::new(in_channels, out_channels, 3, stride, 1, false),
            bn2: BatchNorm2d::new(out_channels),
            conv2: Conv2d::new(out_channels, out_channels, 3, 1, 1, false),
            dropout: Dropout::new(p),
            shortcut,
        }
    }

    pub fn forward(&mut self, x: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let mut out = self.bn1.forward(x)?.relu();
        out = self.conv1.forward(&out)?;
        out = self.dropout.forward(&out)?;
        out = self.bn2.forward(&out)?.relu();
        out = self.conv2.forward(&out)?;
        out = self.dropout.forward(&out)?;

        let residual = match &mut self.shortcut {
            Shortcut2d::Identity => x.clone(),
            Shortcut2d::Projection { conv, norm } => norm.forward(&conv.forward(x)?)?,
        };
        out.add(&residual)
    }

    pub fn set_training(&mut self, training: bool) {
        self.bn1.0.training = training;
        self.bn2.0.training = training;
        self.dropout.training = training;
        if let Shortcut2d::Projection { norm, .. } = &mut self.shortcut {
            norm.0.training = training;
        }
    }

    pub fn visit_layers(&mut self, f: &mut dyn FnMut(LayerMut<'_, T>)) {
        f(LayerMut::Norm2d(&mut self.bn1));
        f(LayerMut::Conv2d(&mut self.conv1));
        f(LayerMut::Norm2d(&mut self.bn2));
        f(LayerMut::Conv2d(&mut self.conv2));
        if let Shortcut2d::Projection { conv, norm } = &mut self.shortcut {
            f(LayerMut::Conv2d(conv));
            f(LayerMut::Norm2d(norm));
        }
    }

    pub fn is_identity_shortcut(&self) -> bool {
        matches!(self.shortcut, Shortcut2d::Identity)
    }
}

impl<T: Float> ResBlock3d<T> {
    pub fn is_identity_shortcut(&self) -> bool {
        matches!(self.shortcut, Shortcut3d::Identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use voxelseg_nn::init_layer;

    fn init<T: Float>(visit: &mut dyn FnMut(&mut dyn FnMut(LayerMut<'_, T>))) {
        let mut rng = StdRng::seed_from_u64(9);
        visit(&mut |layer| init_layer(layer, &mut rng));
    }

    #[test]
    fn test_shortcut_selection() {
        let b: ResBlock3d<f32> = ResBlock3d::new(8, 8, 1, 0.0);
        assert!(b.is_identity_shortcut());
        let b: ResBlock3d<f32> = ResBlock3d::new(8, 16, 1, 0.0);
        assert!(!b.is_identity_shortcut());
        let b: ResBlock3d<f32> = ResBlock3d::new(8, 8, 2, 0.0);
        assert!(!b.is_identity_shortcut());

        let b: ResBlock2d<f32> = ResBlock2d::new(4, 4, 1, 0.0);
        assert!(b.is_identity_shortcut());
        let b: ResBlock2d<f32> = ResBlock2d::new(4, 6, 1, 0.0);
        assert!(!b.is_identity_shortcut());
    }

    #[test]
    fn test_resblock3d_stride_one_preserves_shape() {
        let mut b: ResBlock3d<f32> = ResBlock3d::new(4, 4, 1, 0.0);
        init(&mut |f| b.visit_layers(f));
        let x = Tensor::randn(vec![2, 4, 5, 8, 8], Some(1));
        let y = b.forward(&x).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 4, 5, 8, 8]);
    }

    #[test]
    fn test_resblock3d_stride_two_halves_and_crops_depth() {
        let mut b: ResBlock3d<f32> = ResBlock3d::new(4, 8, 2, 0.0);
        init(&mut |f| b.visit_layers(f));
        let x = Tensor::randn(vec![1, 4, 7, 16, 16], Some(2));
        let y = b.forward(&x).unwrap();
        // depth (7-3)/2+1 = 3 with no depth padding; spatial halved
        assert_eq!(y.shape_vec(), vec![1, 8, 3, 8, 8]);
    }

    #[test]
    fn test_resblock2d_projection_channels() {
        let mut b: ResBlock2d<f32> = ResBlock2d::new(6, 3, 1, 0.0);
        init(&mut |f| b.visit_layers(f));
        let x = Tensor::randn(vec![2, 6, 8, 8], Some(3));
        let y = b.forward(&x).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 3, 8, 8]);
    }

    #[test]
    fn test_train_mode_toggles() {
        let mut b: ResBlock2d<f32> = ResBlock2d::new(4, 4, 1, 0.5);
        b.set_training(true);
        assert!(b.dropout.training);
        b.set_training(false);
        assert!(!b.dropout.training);
    }
}
