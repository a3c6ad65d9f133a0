//! Stock network sizes.
//!
//! Each preset fixes the channel schedule; input sizing follows from the
//! stage count `n`. The contracting path halves height and width `n` times
//! (stage 0 keeps stride 1), so both must be divisible by `2^n`. Depth must
//! collapse to exactly one slice at the bottleneck, which a k=3, stride-2,
//! unpadded depth window does for `depth = 2^(n+1) - 1`: 15 for `small`,
//! 31 for `medium`, 63 for `large`.

use voxelseg_core::Float;

use crate::error::ModelResult;
use crate::unet::{HybridResUnet, UnetConfig};

/// Three-stage network, channels [32, 64, 128] with a 256-channel
/// bottleneck. Expects depth-15 volumes.
pub fn small<T: Float>(
    in_channels: usize,
    out_channels: usize,
    dropout: f64,
) -> ModelResult<HybridResUnet<T>> {
    HybridResUnet::new(UnetConfig {
        in_channels,
        out_channels,
        down_channels: vec![32, 64, 128],
        up_channels: vec![128, 64, 32],
        bottleneck_channels: 256,
        dropout,
        seed: UnetConfig::DEFAULT_SEED,
    })
}

/// Four-stage network, channels [32, 64, 128, 256] with a 512-channel
/// bottleneck. Expects depth-31 volumes.
pub fn medium<T: Float>(
    in_channels: usize,
    out_channels: usize,
    dropout: f64,
) -> ModelResult<HybridResUnet<T>> {
    HybridResUnet::new(UnetConfig {
        in_channels,
        out_channels,
        down_channels: vec![32, 64, 128, 256],
        up_channels: vec![256, 128, 64, 32],
        bottleneck_channels: 512,
        dropout,
        seed: UnetConfig::DEFAULT_SEED,
    })
}

/// Five-stage network, channels [32, 64, 128, 256, 512] with a
/// 1024-channel bottleneck. Expects depth-63 volumes.
pub fn large<T: Float>(
    in_channels: usize,
    out_channels: usize,
    dropout: f64,
) -> ModelResult<HybridResUnet<T>> {
    HybridResUnet::new(UnetConfig {
        in_channels,
        out_channels,
        down_channels: vec![32, 64, 128, 256, 512],
        up_channels: vec![512, 256, 128, 64, 32],
        bottleneck_channels: 1024,
        dropout,
        seed: UnetConfig::DEFAULT_SEED,
    })
}
