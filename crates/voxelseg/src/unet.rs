use rand::rngs::StdRng;
use rand::SeedableRng;
use voxelseg_core::{Float, Tensor, TensorError};
use voxelseg_nn::{init_layer, Conv2d, Conv3d, LayerMut};

use crate::block::{ResBlock2d, ResBlock3d};
use crate::error::{ModelError, ModelResult};
use crate::upconv::{central_index, UpConv};

/// Channel schedule and hyperparameters of a network, fixed at construction.
#[derive(Debug, Clone)]
pub struct UnetConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Output channels of each contracting stage. Stage 0 keeps stride 1;
    /// later stages downsample with stride 2.
    pub down_channels: Vec<usize>,
    /// Output channels of each expanding stage, consumed in order.
    pub up_channels: Vec<usize>,
    pub bottleneck_channels: usize,
    pub dropout: f64,
    /// Seed for the weight-initialization pass.
    pub seed: u64,
}

impl UnetConfig {
    pub const DEFAULT_SEED: u64 = 42;

    /// Number of contracting (equivalently, expanding) stages.
    pub fn stages(&self) -> usize {
        self.down_channels.len()
    }

    fn validate(&self) -> ModelResult<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(ModelError::InvalidConfig(
                "input and output channel counts must be positive".to_string(),
            ));
        }
        if self.down_channels.is_empty() {
            return Err(ModelError::InvalidConfig(
                "at least one contracting stage is required".to_string(),
            ));
        }
        if self.down_channels.len() != self.up_channels.len() {
            return Err(ModelError::InvalidConfig(format!(
                "contracting and expanding stage counts differ: {} vs {}",
                self.down_channels.len(),
                self.up_channels.len()
            )));
        }
        if self.bottleneck_channels == 0
            || self.down_channels.iter().any(|&c| c == 0)
            || self.up_channels.iter().any(|&c| c == 0)
        {
            return Err(ModelError::InvalidConfig(
                "channel counts must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig(format!(
                "dropout probability must be in [0, 1], got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Hybrid residual U-Net: 3D contracting path, 2D expanding path.
///
/// A forward pass takes a (batch, in_channels, depth, height, width) volume
/// and produces (batch, out_channels, height, width) class scores for the
/// central slice. Depth must be sized so the bottleneck collapses it to one
/// slice; height and width must survive the stride-2 stages exactly (see
/// the preset docs).
pub struct HybridResUnet<T: Float> {
    config: UnetConfig,
    conv_in: Conv3d<T>,
    down_blocks: Vec<ResBlock3d<T>>,
    bottleneck: ResBlock3d<T>,
    up_convs: Vec<UpConv<T>>,
    up_blocks: Vec<ResBlock2d<T>>,
    conv_out: Conv2d<T>,
    training: bool,
}

impl<T: Float> HybridResUnet<T> {
    /// Build and initialize a network from a validated configuration.
    pub fn new(config: UnetConfig) -> ModelResult<Self> {
        config.validate()?;
        let n = config.stages();
        let down = &config.down_channels;
        let up = &config.up_channels;
        let p = config.dropout;

        let conv_in = Conv3d::new(config.in_channels, down[0], 3, 1, (1, 1, 1), true);

        let mut down_blocks = Vec::with_capacity(n);
        for i in 0..n {
            if i == 0 {
                down_blocks.push(ResBlock3d::new(down[0], down[0], 1, p));
            } else {
                down_blocks.push(ResBlock3d::new(down[i - 1], down[i], 2, p));
            }
        }

        let bottleneck = ResBlock3d::new(down[n - 1], config.bottleneck_channels, 2, p);

        let mut up_convs = Vec::with_capacity(n);
        let mut up_blocks = Vec::with_capacity(n);
        for i in 0..n {
            let trans_in = if i == 0 {
                config.bottleneck_channels
            } else {
                up[i - 1]
            };
            up_convs.push(UpConv::new(trans_in, up[i]));
            // fused input: skip-slice channels followed by upsampled channels
            let fused = down[n - 1 - i] + up[i];
            up_blocks.push(ResBlock2d::new(fused, up[i], 1, p));
        }

        let conv_out = Conv2d::new(up[n - 1], config.out_channels, 1, 1, 0, true);

        let mut net = HybridResUnet {
            config,
            conv_in,
            down_blocks,
            bottleneck,
            up_convs,
            up_blocks,
            conv_out,
            training: false,
        };

        let mut rng = StdRng::seed_from_u64(net.config.seed);
        net.for_each_layer(&mut |layer| init_layer(layer, &mut rng));
        Ok(net)
    }

    pub fn config(&self) -> &UnetConfig {
        &self.config
    }

    /// Forward pass: volume in, central-slice class scores out.
    pub fn forward(&mut self, x: &Tensor<T>) -> ModelResult<Tensor<T>> {
        let dims = x.shape_vec();
        if dims.len() != 5 {
            return Err(TensorError::DimensionMismatch(format!(
                "expected a (batch, channel, depth, height, width) input, got rank {}",
                dims.len()
            ))
            .into());
        }
        if dims[1] != self.config.in_channels {
            return Err(TensorError::DimensionMismatch(format!(
                "expected {} input channels, got {}",
                self.config.in_channels, dims[1]
            ))
            .into());
        }

        let mut out = self.conv_in.forward(x)?;

        let mut skips = Vec::with_capacity(self.down_blocks.len());
        for block in &mut self.down_blocks {
            out = block.forward(&out)?;
            skips.push(out.clone());
        }

        out = self.bottleneck.forward(&out)?;
        let depth = out.shape().dim(2)?;
        if depth != 1 {
            return Err(ModelError::BottleneckDepth { depth });
        }
        let mut plane = out.select(2, central_index(depth))?;

        // skip stack drains last-in-first-out
        let stages = self.up_convs.iter().zip(self.up_blocks.iter_mut());
        for ((up_conv, up_block), skip) in stages.zip(skips.into_iter().rev()) {
            plane = up_conv.forward(&skip, &plane)?;
            plane = up_block.forward(&plane)?;
        }

        Ok(self.conv_out.forward(&plane)?)
    }

    /// Put the network in training mode: dropout active, batch statistics.
    pub fn train(&mut self) {
        self.set_training(true);
    }

    /// Put the network in inference mode (the state after construction).
    pub fn eval(&mut self) {
        self.set_training(false);
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for block in &mut self.down_blocks {
            block.set_training(training);
        }
        self.bottleneck.set_training(training);
        for block in &mut self.up_blocks {
            block.set_training(training);
        }
    }

    /// Visit every parameterized layer exactly once, in graph order. The
    /// initialization pass runs through this.
    pub fn for_each_layer(&mut self, f: &mut dyn FnMut(LayerMut<'_, T>)) {
        f(LayerMut::Conv3d(&mut self.conv_in));
        for block in &mut self.down_blocks {
            block.visit_layers(f);
        }
        self.bottleneck.visit_layers(f);
        for (up_conv, up_block) in self.up_convs.iter_mut().zip(self.up_blocks.iter_mut()) {
            up_conv.visit_layers(f);
            up_block.visit_layers(f);
        }
        f(LayerMut::Conv2d(&mut self.conv_out));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-stage network small enough for exhaustive forward tests.
    /// Depth reductions: stage 1 and the bottleneck, so depth 7 -> 3 -> 1.
    fn tiny_config(dropout: f64) -> UnetConfig {
        UnetConfig {
            in_channels: 1,
            out_channels: 3,
            down_channels: vec![4, 8],
            up_channels: vec![8, 4],
            bottleneck_channels: 16,
            dropout,
            seed: UnetConfig::DEFAULT_SEED,
        }
    }

    #[test]
    fn test_forward_shape_matches_input_plane() {
        let mut net: HybridResUnet<f32> = HybridResUnet::new(tiny_config(0.0)).unwrap();
        let x = Tensor::randn(vec![2, 1, 7, 8, 8], Some(1));
        let y = net.forward(&x).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 3, 8, 8]);
    }

    #[test]
    fn test_forward_is_deterministic_in_eval() {
        let mut a: HybridResUnet<f64> = HybridResUnet::new(tiny_config(0.0)).unwrap();
        let mut b: HybridResUnet<f64> = HybridResUnet::new(tiny_config(0.0)).unwrap();
        let x = Tensor::randn(vec![1, 1, 7, 8, 8], Some(2));
        assert_eq!(a.forward(&x).unwrap(), b.forward(&x).unwrap());
    }

    #[test]
    fn test_dropout_probability_does_not_change_shape() {
        let x = Tensor::randn(vec![1, 1, 7, 8, 8], Some(3));
        let mut shapes = Vec::new();
        for p in [0.0, 0.5, 0.9] {
            let mut net: HybridResUnet<f32> = HybridResUnet::new(tiny_config(p)).unwrap();
            shapes.push(net.forward(&x).unwrap().shape_vec());
            net.train();
            shapes.push(net.forward(&x).unwrap().shape_vec());
        }
        assert!(shapes.iter().all(|s| *s == vec![1, 3, 8, 8]));
    }

    #[test]
    fn test_initialization_policy() {
        let mut net: HybridResUnet<f64> = HybridResUnet::new(tiny_config(0.0)).unwrap();
        let mut norm_params = 0usize;
        let mut conv_tensors = 0usize;
        net.for_each_layer(&mut |layer| match layer {
            LayerMut::Norm2d(n) => {
                assert!(n.0.weight.data().iter().all(|&v| v == 1.0));
                assert!(n.0.bias.data().iter().all(|&v| v == 0.0));
                norm_params += 1;
            }
            LayerMut::Norm3d(n) => {
                assert!(n.0.weight.data().iter().all(|&v| v == 1.0));
                assert!(n.0.bias.data().iter().all(|&v| v == 0.0));
                norm_params += 1;
            }
            LayerMut::Conv2d(c) => {
                let first = c.weight.data()[0];
                assert!(c.weight.data().iter().any(|&v| v != first));
                conv_tensors += 1;
            }
            LayerMut::Conv3d(c) => {
                let first = c.weight.data()[0];
                assert!(c.weight.data().iter().any(|&v| v != first));
                conv_tensors += 1;
            }
            LayerMut::ConvTranspose2d(c) => {
                let first = c.weight.data()[0];
                assert!(c.weight.data().iter().any(|&v| v != first));
                conv_tensors += 1;
            }
        });
        assert!(norm_params > 0);
        assert!(conv_tensors > 0);
    }

    #[test]
    fn test_bottleneck_depth_invariant() {
        // depth 15 leaves the two-stage bottleneck with depth 3, not 1
        let mut net: HybridResUnet<f32> = HybridResUnet::new(tiny_config(0.0)).unwrap();
        let x = Tensor::zeros(vec![1, 1, 15, 8, 8]);
        assert!(matches!(
            net.forward(&x),
            Err(ModelError::BottleneckDepth { depth: 3 })
        ));
    }

    #[test]
    fn test_indivisible_plane_fails_at_fusion() {
        // 10 is divisible by 2 but not by 4: the upsampled plane cannot
        // line up with the stage-1 skip slice
        let mut net: HybridResUnet<f32> = HybridResUnet::new(tiny_config(0.0)).unwrap();
        let x = Tensor::zeros(vec![1, 1, 7, 10, 10]);
        assert!(matches!(
            net.forward(&x),
            Err(ModelError::Tensor(TensorError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn test_wrong_input_rank_and_channels() {
        let mut net: HybridResUnet<f32> = HybridResUnet::new(tiny_config(0.0)).unwrap();
        assert!(net.forward(&Tensor::zeros(vec![1, 1, 8, 8])).is_err());
        assert!(net.forward(&Tensor::zeros(vec![1, 2, 7, 8, 8])).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut c = tiny_config(0.0);
        c.up_channels = vec![8];
        assert!(matches!(
            HybridResUnet::<f32>::new(c),
            Err(ModelError::InvalidConfig(_))
        ));

        let mut c = tiny_config(0.0);
        c.down_channels.clear();
        c.up_channels.clear();
        assert!(HybridResUnet::<f32>::new(c).is_err());

        let c = tiny_config(1.5);
        assert!(HybridResUnet::<f32>::new(c).is_err());

        let mut c = tiny_config(0.0);
        c.in_channels = 0;
        assert!(HybridResUnet::<f32>::new(c).is_err());
    }

    #[test]
    fn test_training_mode_round_trip() {
        let mut net: HybridResUnet<f32> = HybridResUnet::new(tiny_config(0.5)).unwrap();
        assert!(!net.is_training());
        net.train();
        assert!(net.is_training());
        let x = Tensor::randn(vec![1, 1, 7, 8, 8], Some(4));
        let y = net.forward(&x).unwrap();
        assert_eq!(y.shape_vec(), vec![1, 3, 8, 8]);
        net.eval();
        assert!(!net.is_training());
    }
}
