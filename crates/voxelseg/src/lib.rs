//! # voxelseg
//!
//! Hybrid 3D/2D residual U-Net for volumetric medical-image segmentation.
//!
//! The contracting path consumes a small stack of adjacent slices as a
//! volume and downsamples it with 3D residual blocks; the expanding path
//! upsamples 2D feature maps back to the input resolution, fusing each stage
//! with the central slice of the matching 3D skip tensor. The output is a
//! per-pixel class score map for exactly the central slice of the input.
//!
//! This crate is the model definition only: a differentiable function from
//! input tensor to output tensor. Training, data loading, and checkpointing
//! are external collaborators.
//!
//! ## Crates
//!
//! - **core** — tensor engine: flat row-major `Tensor<T>` with the
//!   structural ops this model needs
//! - **nn** — layer primitives: 2D/3D convolution, transposed convolution,
//!   batch normalization, channel dropout, weight initialization

/// Tensor engine.
pub use voxelseg_core as core;

/// Layer primitives.
pub use voxelseg_nn as nn;

pub mod block;
pub mod error;
pub mod presets;
pub mod unet;
pub mod upconv;

pub use block::{ResBlock2d, ResBlock3d};
pub use error::{ModelError, ModelResult};
pub use presets::{large, medium, small};
pub use unet::{HybridResUnet, UnetConfig};
pub use upconv::UpConv;
