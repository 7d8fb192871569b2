//! Working-image tensors for Protego.
//!
//! A [`WorkingImage`] is an (height, width, 3) `f32` tensor tagged with the
//! value [`Domain`](protego_core::Domain) it must stay in. Every update made by
//! an attack strategy goes through [`WorkingImage::clip`] before the image is
//! handed back to a model.

pub mod image;
pub mod quantize;
pub mod resize;
pub mod spectral;

pub use image::{gaussian_noise, sign, standard_normal, WorkingImage};
pub use quantize::{dequantize, quantize_u8};
pub use resize::resize_bilinear;
pub use spectral::SpectralAttenuator;
