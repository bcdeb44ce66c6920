use candle_core::{Device, Result as CandleResult, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder};

/// Build the fixed additive causal mask for a decoder context.
///
/// The returned tensor is shaped `(context_size, context_size)` with `0.0` on
/// and below the diagonal and `f32::NEG_INFINITY` strictly above it, so that
/// position `i` can only attend to positions `<= i` once the mask is added to
/// the raw attention scores.
pub fn causal_attention_mask(context_size: usize, device: &Device) -> CandleResult<Tensor> {
    let mut data = vec![0f32; context_size * context_size];
    for i in 0..context_size {
        for j in (i + 1)..context_size {
            data[i * context_size + j] = f32::NEG_INFINITY;
        }
    }
    Tensor::from_vec(data, (context_size, context_size), device)
}

/// Multi-head scaled dot-product attention over a single sequence.
///
/// Projects the input to `num_heads` heads of `qk_dim` each, attends, then
/// projects back to `in_dim`. When constructed with a context size the layer
/// is causal: a fixed upper-triangular mask keeps every position from seeing
/// the future.
#[derive(Debug)]
pub struct SelfAttention {
    /// Query projection: in_dim -> qk_dim * num_heads
    query: Linear,
    /// Key projection: in_dim -> qk_dim * num_heads
    key: Linear,
    /// Value projection: in_dim -> qk_dim * num_heads
    value: Linear,
    /// Output projection: qk_dim * num_heads -> in_dim
    proj: Linear,
    /// Dropout applied to attention weights and to the projected output
    dropout: Dropout,
    /// Number of attention heads
    num_heads: usize,
    /// Dimension of each head
    qk_dim: usize,
    /// Additive causal mask, present only for causal attention
    att_mask: Option<Tensor>,
    /// Scale factor for attention scores (qk_dim^-0.5)
    scale: f64,
}

impl SelfAttention {
    /// Create a new self-attention layer.
    ///
    /// `context_size = None` means non-causal (encoder) attention; `Some(c)`
    /// precomputes a causal mask sized `c x c` and caps the sequence length.
    pub fn new(
        in_dim: usize,
        qk_dim: usize,
        num_heads: usize,
        context_size: Option<usize>,
        dropout_rate: f32,
        vb: VarBuilder,
    ) -> CandleResult<Self> {
        let proj_dim = qk_dim * num_heads;

        let query = candle_nn::linear(in_dim, proj_dim, vb.pp("query"))?;
        let key = candle_nn::linear(in_dim, proj_dim, vb.pp("key"))?;
        let value = candle_nn::linear(in_dim, proj_dim, vb.pp("value"))?;
        let proj = candle_nn::linear(proj_dim, in_dim, vb.pp("proj"))?;

        let dropout = Dropout::new(dropout_rate);

        let att_mask = match context_size {
            Some(context) => Some(causal_attention_mask(context, vb.device())?),
            None => None,
        };

        let scale = 1.0 / (qk_dim as f64).sqrt();

        Ok(SelfAttention {
            query,
            key,
            value,
            proj,
            dropout,
            num_heads,
            qk_dim,
            att_mask,
            scale,
        })
    }

    /// Whether this layer applies a causal mask.
    pub fn is_causal(&self) -> bool {
        self.att_mask.is_some()
    }

    /// Forward pass: (B, T, in_dim) -> (B, T, in_dim).
    pub fn forward(&self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let (batch, seq_len, _in_dim) = x.dims3()?;

        if let Some(mask) = &self.att_mask {
            let context = mask.dim(0)?;
            if seq_len > context {
                return Err(candle_core::Error::Msg(format!(
                    "sequence length {} exceeds causal context size {}",
                    seq_len, context
                )));
            }
        }

        // Project and split into heads: (B, T, H * Q) -> (B, H, T, Q)
        let queries = self
            .query
            .forward(x)?
            .reshape((batch, seq_len, self.num_heads, self.qk_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let keys = self
            .key
            .forward(x)?
            .reshape((batch, seq_len, self.num_heads, self.qk_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let values = self
            .value
            .forward(x)?
            .reshape((batch, seq_len, self.num_heads, self.qk_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        // Scaled dot-product scores: (B, H, T, T)
        let att = queries
            .matmul(&keys.transpose(2, 3)?)?
            .affine(self.scale, 0.0)?;

        // Mask out future positions before the softmax
        let att = match &self.att_mask {
            Some(mask) => {
                let mask = mask
                    .narrow(0, 0, seq_len)?
                    .narrow(1, 0, seq_len)?
                    .unsqueeze(0)?
                    .unsqueeze(0)?
                    .broadcast_as(att.shape())?;
                att.add(&mask)?
            }
            None => att,
        };

        let att = candle_nn::ops::softmax_last_dim(&att)?;
        let att = if train {
            self.dropout.forward(&att, train)?
        } else {
            att
        };

        // Weighted sum of values, then merge heads back: (B, T, H * Q)
        let out = att.matmul(&values)?;
        let out = out
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, self.num_heads * self.qk_dim))?;

        let out = self.proj.forward(&out)?;
        if train {
            self.dropout.forward(&out, train)
        } else {
            Ok(out)
        }
    }
}

/// Multi-head attention between two sequences.
///
/// Queries come from the decoder activations, keys and values from the
/// encoder output. No mask is applied: every decoder position has full
/// access to the whole encoder sequence.
#[derive(Debug)]
pub struct CrossAttention {
    /// Query projection: in_dec_dim -> qk_dim * num_heads
    query: Linear,
    /// Key projection: in_enc_dim -> qk_dim * num_heads
    key: Linear,
    /// Value projection: in_enc_dim -> qk_dim * num_heads
    value: Linear,
    /// Output projection: qk_dim * num_heads -> in_dec_dim
    proj: Linear,
    /// Dropout applied to attention weights and to the projected output
    dropout: Dropout,
    num_heads: usize,
    qk_dim: usize,
    scale: f64,
}

impl CrossAttention {
    /// Create a new cross-attention layer bridging encoder and decoder widths.
    pub fn new(
        in_enc_dim: usize,
        in_dec_dim: usize,
        qk_dim: usize,
        num_heads: usize,
        dropout_rate: f32,
        vb: VarBuilder,
    ) -> CandleResult<Self> {
        let proj_dim = qk_dim * num_heads;

        let query = candle_nn::linear(in_dec_dim, proj_dim, vb.pp("query"))?;
        let key = candle_nn::linear(in_enc_dim, proj_dim, vb.pp("key"))?;
        let value = candle_nn::linear(in_enc_dim, proj_dim, vb.pp("value"))?;
        let proj = candle_nn::linear(proj_dim, in_dec_dim, vb.pp("proj"))?;

        let dropout = Dropout::new(dropout_rate);
        let scale = 1.0 / (qk_dim as f64).sqrt();

        Ok(CrossAttention {
            query,
            key,
            value,
            proj,
            dropout,
            num_heads,
            qk_dim,
            scale,
        })
    }

    /// Forward pass: (B, T_enc, in_enc_dim) x (B, T_dec, in_dec_dim)
    /// -> (B, T_dec, in_dec_dim).
    pub fn forward(&self, x_enc: &Tensor, x_dec: &Tensor, train: bool) -> CandleResult<Tensor> {
        let (batch, t_dec, _) = x_dec.dims3()?;
        let (_batch, t_enc, _) = x_enc.dims3()?;

        let queries = self
            .query
            .forward(x_dec)?
            .reshape((batch, t_dec, self.num_heads, self.qk_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let keys = self
            .key
            .forward(x_enc)?
            .reshape((batch, t_enc, self.num_heads, self.qk_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let values = self
            .value
            .forward(x_enc)?
            .reshape((batch, t_enc, self.num_heads, self.qk_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        // Scores over encoder positions: (B, H, T_dec, T_enc)
        let att = queries
            .matmul(&keys.transpose(2, 3)?)?
            .affine(self.scale, 0.0)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;
        let att = if train {
            self.dropout.forward(&att, train)?
        } else {
            att
        };

        let out = att.matmul(&values)?;
        let out = out
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, t_dec, self.num_heads * self.qk_dim))?;

        let out = self.proj.forward(&out)?;
        if train {
            self.dropout.forward(&out, train)
        } else {
            Ok(out)
        }
    }
}
