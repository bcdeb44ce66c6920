//! Character-level encoder-decoder transformer for name generation.
//!
//! The model is built on candle: embeddings, multi-head self- and
//! cross-attention, pre-norm residual blocks, a fixed sinusoidal positional
//! table and an autoregressive sampling loop. The [`dataset`] module builds
//! the character vocabulary and sliding-window training pairs that feed the
//! model.

pub mod attention;
pub mod dataset;
pub mod model;

pub use attention::{causal_attention_mask, CrossAttention, SelfAttention};
pub use dataset::{build_dataset, read_words, to_tensors, CharVocab, SENTINEL};
pub use model::{
    sinusoidal_positional_encoding, Decoder, Encoder, FeedForward, Transformer, TransformerConfig,
};

use anyhow::Result;
use candle_core::Device;

/// Pick the best available compute device.
///
/// `CANDLE_FORCE_CPU` overrides detection; otherwise Metal (when built with
/// the `metal` feature) and CUDA are tried before falling back to the CPU.
pub fn setup_device() -> Result<Device> {
    if std::env::var("CANDLE_FORCE_CPU").is_ok() {
        println!("CANDLE_FORCE_CPU set, using CPU backend");
        return Ok(Device::Cpu);
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            println!("Metal device selected: {:?}", device);
            return Ok(device);
        }
        println!("Metal unavailable, falling back...");
    }

    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => {
            println!("CUDA device selected: {:?}", device);
            Ok(device)
        }
        Ok(_) | Err(_) => {
            println!("Using CPU backend");
            Ok(Device::Cpu)
        }
    }
}
