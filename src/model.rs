use candle_core::{Device, Result as CandleResult, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, Linear, Module, VarBuilder};

use crate::attention::{CrossAttention, SelfAttention};

/// Compute the fixed sinusoidal positional table.
///
/// For position `p` and dimension `i` the angle is
/// `p / 10000^((2 * (i div 2)) / dim)`; even dimensions hold the sine of the
/// angle, odd dimensions the cosine. The table is deterministic and computed
/// once on the host before being uploaded to `device`.
pub fn sinusoidal_positional_encoding(
    dim: usize,
    length: usize,
    device: &Device,
) -> CandleResult<Tensor> {
    let mut data = vec![0f32; length * dim];
    for p in 0..length {
        for i in 0..dim {
            let exponent = (2 * (i / 2)) as f32 / dim as f32;
            let angle = p as f32 / 10000f32.powf(exponent);
            data[p * dim + i] = if i % 2 == 0 { angle.sin() } else { angle.cos() };
        }
    }
    Tensor::from_vec(data, (length, dim), device)
}

/// Position-wise feed-forward network with a 4x inner expansion.
#[derive(Debug)]
pub struct FeedForward {
    /// Expansion layer: in_dim -> 4 * in_dim
    first: Linear,
    /// Contraction layer: 4 * in_dim -> in_dim
    second: Linear,
    /// Dropout applied after the contraction
    dropout: Dropout,
}

impl FeedForward {
    /// Create a new feed-forward network.
    pub fn new(in_dim: usize, dropout_rate: f32, vb: VarBuilder) -> CandleResult<Self> {
        let inner_dim = 4 * in_dim;
        let first = candle_nn::linear(in_dim, inner_dim, vb.pp("first"))?;
        let second = candle_nn::linear(inner_dim, in_dim, vb.pp("second"))?;
        let dropout = Dropout::new(dropout_rate);

        Ok(FeedForward {
            first,
            second,
            dropout,
        })
    }

    /// Forward pass: Linear -> ReLU -> Linear -> Dropout, shape preserving.
    pub fn forward(&self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let x = self.first.forward(x)?.relu()?;
        let x = self.second.forward(&x)?;
        if train {
            self.dropout.forward(&x, train)
        } else {
            Ok(x)
        }
    }
}

/// Encoder layer: pre-norm residual self-attention followed by a pre-norm
/// residual feed-forward block.
#[derive(Debug)]
pub struct Encoder {
    sa: SelfAttention,
    ln1: LayerNorm,
    ffn: FeedForward,
    ln2: LayerNorm,
}

impl Encoder {
    /// Create a new encoder layer. Encoder self-attention is bidirectional,
    /// so no causal context is configured.
    pub fn new(
        in_dim: usize,
        qk_dim: usize,
        num_heads: usize,
        dropout_rate: f32,
        vb: VarBuilder,
    ) -> CandleResult<Self> {
        let sa = SelfAttention::new(in_dim, qk_dim, num_heads, None, dropout_rate, vb.pp("sa"))?;
        let ln1 = candle_nn::layer_norm(in_dim, 1e-5, vb.pp("ln1"))?;
        let ffn = FeedForward::new(in_dim, dropout_rate, vb.pp("ffn"))?;
        let ln2 = candle_nn::layer_norm(in_dim, 1e-5, vb.pp("ln2"))?;

        Ok(Encoder { sa, ln1, ffn, ln2 })
    }

    /// `x = x + sa(ln1(x)); x = x + ffn(ln2(x))`
    pub fn forward(&self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let x = x.add(&self.sa.forward(&self.ln1.forward(x)?, train)?)?;
        let x = x.add(&self.ffn.forward(&self.ln2.forward(&x)?, train)?)?;
        Ok(x)
    }
}

/// Decoder layer: causal self-attention, cross-attention over the encoder
/// output, and a feed-forward block, each pre-normed with a residual skip.
#[derive(Debug)]
pub struct Decoder {
    sa: SelfAttention,
    ln1: LayerNorm,
    ca: CrossAttention,
    ln2: LayerNorm,
    ffn: FeedForward,
    ln3: LayerNorm,
}

impl Decoder {
    /// Create a new decoder layer. `context_size` bounds the decoder sequence
    /// length through the causal mask.
    pub fn new(
        in_enc_dim: usize,
        in_dec_dim: usize,
        qk_dim: usize,
        num_heads: usize,
        context_size: usize,
        dropout_rate: f32,
        vb: VarBuilder,
    ) -> CandleResult<Self> {
        let sa = SelfAttention::new(
            in_dec_dim,
            qk_dim,
            num_heads,
            Some(context_size),
            dropout_rate,
            vb.pp("sa"),
        )?;
        let ln1 = candle_nn::layer_norm(in_dec_dim, 1e-5, vb.pp("ln1"))?;
        let ca = CrossAttention::new(
            in_enc_dim,
            in_dec_dim,
            qk_dim,
            num_heads,
            dropout_rate,
            vb.pp("ca"),
        )?;
        let ln2 = candle_nn::layer_norm(in_dec_dim, 1e-5, vb.pp("ln2"))?;
        let ffn = FeedForward::new(in_dec_dim, dropout_rate, vb.pp("ffn"))?;
        let ln3 = candle_nn::layer_norm(in_dec_dim, 1e-5, vb.pp("ln3"))?;

        Ok(Decoder {
            sa,
            ln1,
            ca,
            ln2,
            ffn,
            ln3,
        })
    }

    /// `x = x_dec + sa(ln1(x_dec)); x = x + ca(x_enc, ln2(x)); x = x + ffn(ln3(x))`
    pub fn forward(&self, x_enc: &Tensor, x_dec: &Tensor, train: bool) -> CandleResult<Tensor> {
        let x = x_dec.add(&self.sa.forward(&self.ln1.forward(x_dec)?, train)?)?;
        let x = x.add(&self.ca.forward(x_enc, &self.ln2.forward(&x)?, train)?)?;
        let x = x.add(&self.ffn.forward(&self.ln3.forward(&x)?, train)?)?;
        Ok(x)
    }
}

/// Hyperparameters for the encoder-decoder transformer.
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    /// Encoder vocabulary size
    pub vocab_enc_size: usize,
    /// Encoder embedding dimension
    pub emb_enc_dim: usize,
    /// Maximum encoder sequence length
    pub context_enc_size: usize,
    /// Decoder vocabulary size
    pub vocab_dec_size: usize,
    /// Decoder embedding dimension
    pub emb_dec_dim: usize,
    /// Maximum decoder sequence length
    pub context_dec_size: usize,
    /// Dimension of each attention head
    pub qk_dim: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Number of stacked encoder and decoder layers
    pub num_layers: usize,
    /// Dropout probability
    pub dropout_rate: f32,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        TransformerConfig {
            vocab_enc_size: 27,  // 26 letters plus the '.' sentinel
            emb_enc_dim: 64,     // Encoder embedding dimension
            context_enc_size: 16, // Encoder context length
            vocab_dec_size: 27,  // Same character vocabulary on the decoder side
            emb_dec_dim: 64,     // Decoder embedding dimension
            context_dec_size: 16, // Decoder context length
            qk_dim: 16,          // Per-head dimension
            num_heads: 4,        // Number of heads
            num_layers: 2,       // Encoder/decoder depth
            dropout_rate: 0.1,   // Dropout rate
        }
    }
}

impl TransformerConfig {
    /// Validate structural invariants before any parameters are allocated.
    pub fn validate(&self) -> CandleResult<()> {
        if self.num_layers == 0 {
            return Err(candle_core::Error::Msg(
                "num_layers must be greater than zero".into(),
            ));
        }
        if self.vocab_enc_size == 0 || self.vocab_dec_size == 0 {
            return Err(candle_core::Error::Msg(
                "vocabulary sizes must be greater than zero".into(),
            ));
        }
        if self.emb_enc_dim == 0 || self.emb_dec_dim == 0 {
            return Err(candle_core::Error::Msg(
                "embedding dimensions must be greater than zero".into(),
            ));
        }
        if self.context_enc_size == 0 || self.context_dec_size == 0 {
            return Err(candle_core::Error::Msg(
                "context sizes must be greater than zero".into(),
            ));
        }
        if self.qk_dim == 0 || self.num_heads == 0 {
            return Err(candle_core::Error::Msg(
                "qk_dim and num_heads must be greater than zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(candle_core::Error::Msg(
                "dropout_rate must be in [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// Encoder-decoder transformer over integer token ids.
///
/// Owns all parameters; callers pick training or inference behaviour through
/// the `train` flag on [`Transformer::forward`]. Generation always runs in
/// inference mode.
#[derive(Debug)]
pub struct Transformer {
    config: TransformerConfig,
    /// Encoder token embedding table
    emb_enc: Embedding,
    /// Decoder token embedding table
    emb_dec: Embedding,
    /// Fixed sinusoidal table for encoder positions
    pos_enc: Tensor,
    /// Fixed sinusoidal table for decoder positions
    pos_dec: Tensor,
    /// Stacked encoder layers
    encoders: Vec<Encoder>,
    /// Stacked decoder layers
    decoders: Vec<Decoder>,
    /// Output projection: emb_dec_dim -> vocab_dec_size
    linear: Linear,
    /// Dropout applied to the summed token and positional embeddings
    dropout: Dropout,
}

impl Transformer {
    /// Build the transformer and all of its layers from `config`.
    pub fn new(config: TransformerConfig, vb: VarBuilder) -> CandleResult<Self> {
        config.validate()?;

        let emb_enc =
            candle_nn::embedding(config.vocab_enc_size, config.emb_enc_dim, vb.pp("emb_enc"))?;
        let emb_dec =
            candle_nn::embedding(config.vocab_dec_size, config.emb_dec_dim, vb.pp("emb_dec"))?;

        let pos_enc =
            sinusoidal_positional_encoding(config.emb_enc_dim, config.context_enc_size, vb.device())?;
        let pos_dec =
            sinusoidal_positional_encoding(config.emb_dec_dim, config.context_dec_size, vb.device())?;

        let mut encoders = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            encoders.push(Encoder::new(
                config.emb_enc_dim,
                config.qk_dim,
                config.num_heads,
                config.dropout_rate,
                vb.pp(format!("enc.{}", i)),
            )?);
        }

        let mut decoders = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            decoders.push(Decoder::new(
                config.emb_enc_dim,
                config.emb_dec_dim,
                config.qk_dim,
                config.num_heads,
                config.context_dec_size,
                config.dropout_rate,
                vb.pp(format!("dec.{}", i)),
            )?);
        }

        let linear =
            candle_nn::linear(config.emb_dec_dim, config.vocab_dec_size, vb.pp("lm_head"))?;
        let dropout = Dropout::new(config.dropout_rate);

        Ok(Transformer {
            config,
            emb_enc,
            emb_dec,
            pos_enc,
            pos_dec,
            encoders,
            decoders,
            linear,
            dropout,
        })
    }

    /// Get the model configuration.
    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Embed token ids and add the sliced positional table.
    fn embed(
        &self,
        tokens: &Tensor,
        embedding: &Embedding,
        pos_table: &Tensor,
        context_size: usize,
        side: &str,
        train: bool,
    ) -> CandleResult<Tensor> {
        let (_batch, seq_len) = tokens.dims2()?;
        if seq_len > context_size {
            return Err(candle_core::Error::Msg(format!(
                "{} sequence length {} exceeds context size {}",
                side, seq_len, context_size
            )));
        }

        let tok_emb = embedding.forward(tokens)?;
        let pos_emb = pos_table
            .narrow(0, 0, seq_len)?
            .unsqueeze(0)?
            .broadcast_as(tok_emb.shape())?;
        let x = tok_emb.add(&pos_emb)?;
        if train {
            self.dropout.forward(&x, train)
        } else {
            Ok(x)
        }
    }

    /// Forward pass over encoder and decoder token ids.
    ///
    /// `x_enc` is shaped `(B, T_enc)` and `x_dec` `(B, T_dec)`, both `u32`.
    /// Returns logits shaped `(B, T_dec, vocab_dec_size)`.
    pub fn forward(&self, x_enc: &Tensor, x_dec: &Tensor, train: bool) -> CandleResult<Tensor> {
        let mut enc = self.embed(
            x_enc,
            &self.emb_enc,
            &self.pos_enc,
            self.config.context_enc_size,
            "encoder",
            train,
        )?;
        let mut dec = self.embed(
            x_dec,
            &self.emb_dec,
            &self.pos_dec,
            self.config.context_dec_size,
            "decoder",
            train,
        )?;

        for encoder in &self.encoders {
            enc = encoder.forward(&enc, train)?;
        }
        for decoder in &self.decoders {
            dec = decoder.forward(&enc, &dec, train)?;
        }

        self.linear.forward(&dec)
    }

    /// Autoregressively sample a decoder sequence conditioned on `x_enc`.
    ///
    /// Starts from `[start_token_id]` and repeatedly reruns the full forward
    /// pass (no key/value caching), softmaxes the logits of the last position
    /// and draws the next token by multinomial sampling. Stops as soon as
    /// `end_token_id` is drawn or after `max_length` steps. Returns the
    /// `(1, T)` sequence including the start token.
    pub fn generate(
        &self,
        x_enc: &Tensor,
        start_token_id: u32,
        end_token_id: u32,
        max_length: usize,
    ) -> CandleResult<Tensor> {
        let device = x_enc.device();
        let mut tokens: Vec<u32> = vec![start_token_id];

        for _ in 0..max_length {
            let current = Tensor::from_vec(tokens.clone(), (1, tokens.len()), device)?;

            // Inference mode: dropout off, full recompute each step
            let logits = self.forward(x_enc, &current, false)?;
            let last = logits.narrow(1, logits.dim(1)? - 1, 1)?.squeeze(1)?; // (1, vocab)
            let probs = candle_nn::ops::softmax_last_dim(&last)?;

            let next_token = multinomial_sample(&probs.squeeze(0)?)?;
            tokens.push(next_token);

            if next_token == end_token_id {
                break;
            }
        }

        Tensor::from_vec(tokens.clone(), (1, tokens.len()), device)
    }

    /// Analytic count of learnable parameters, biases included.
    pub fn count_parameters(&self) -> usize {
        let cfg = &self.config;
        let hq = cfg.qk_dim * cfg.num_heads;

        let self_attention = |in_dim: usize| 3 * (in_dim * hq + hq) + hq * in_dim + in_dim;
        let cross_attention = (cfg.emb_dec_dim * hq + hq)
            + 2 * (cfg.emb_enc_dim * hq + hq)
            + hq * cfg.emb_dec_dim
            + cfg.emb_dec_dim;
        let feed_forward =
            |in_dim: usize| in_dim * 4 * in_dim + 4 * in_dim + 4 * in_dim * in_dim + in_dim;
        let layer_norm = |in_dim: usize| 2 * in_dim;

        let encoder_layer =
            self_attention(cfg.emb_enc_dim) + feed_forward(cfg.emb_enc_dim) + 2 * layer_norm(cfg.emb_enc_dim);
        let decoder_layer = self_attention(cfg.emb_dec_dim)
            + cross_attention
            + feed_forward(cfg.emb_dec_dim)
            + 3 * layer_norm(cfg.emb_dec_dim);

        cfg.vocab_enc_size * cfg.emb_enc_dim
            + cfg.vocab_dec_size * cfg.emb_dec_dim
            + cfg.num_layers * (encoder_layer + decoder_layer)
            + cfg.emb_dec_dim * cfg.vocab_dec_size
            + cfg.vocab_dec_size
    }
}

/// Draw one index from a probability distribution shaped `(vocab,)`.
fn multinomial_sample(probs: &Tensor) -> CandleResult<u32> {
    let prob_vec = probs.to_vec1::<f32>()?;

    let random_val = fastrand::f32();
    let mut cumulative = 0.0f32;
    for (i, &p) in prob_vec.iter().enumerate() {
        cumulative += p;
        if random_val <= cumulative {
            return Ok(i as u32);
        }
    }

    // Rounding can leave the cumulative sum just below 1.0
    Ok(prob_vec.len().saturating_sub(1) as u32)
}
