pub mod conv;
pub mod dropout;
pub mod init;
pub mod norm;

pub use conv::{Conv2d, Conv3d, ConvTranspose2d};
pub use dropout::Dropout;
pub use init::{init_layer, LayerMut};
pub use norm::{BatchNorm2d, BatchNorm3d};
