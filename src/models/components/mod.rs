pub mod layers;

pub use layers::{layer_norm, linear, Embedding, LayerNorm, Linear};
