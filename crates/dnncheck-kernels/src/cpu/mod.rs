//! Native CPU kernels operating on logical-order `f32` slices.

pub mod eltwise;
pub mod layer_norm;

pub use layer_norm::{
    LayerNormBackward, LayerNormConfig, LayerNormForward, layer_norm_backward, layer_norm_forward,
};
