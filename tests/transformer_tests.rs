use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use nameformer::{Transformer, TransformerConfig};

fn var_builder(device: &Device) -> VarBuilder<'static> {
    let varmap = VarMap::new();
    VarBuilder::from_varmap(&varmap, DType::F32, device)
}

fn token_tensor(data: &[u32], device: &Device) -> Tensor {
    Tensor::from_vec(data.to_vec(), (1, data.len()), device).unwrap()
}

fn tiny_config() -> TransformerConfig {
    TransformerConfig {
        vocab_enc_size: 10,
        emb_enc_dim: 16,
        context_enc_size: 8,
        vocab_dec_size: 10,
        emb_dec_dim: 16,
        context_dec_size: 8,
        qk_dim: 4,
        num_heads: 2,
        num_layers: 1,
        dropout_rate: 0.0,
    }
}

#[test]
fn transformer_forward_logit_shapes() {
    let device = Device::Cpu;
    let vb = var_builder(&device);
    let model = Transformer::new(tiny_config(), vb).unwrap();

    let x_enc = token_tensor(&[1, 2, 3, 4, 5], &device);
    let x_dec = token_tensor(&[0, 6, 7], &device);

    let logits = model.forward(&x_enc, &x_dec, false).unwrap();
    assert_eq!(logits.dims3().unwrap(), (1, 3, 10));
}

#[test]
fn transformer_forward_training_mode_shapes() {
    let device = Device::Cpu;
    let vb = var_builder(&device);
    let config = TransformerConfig {
        dropout_rate: 0.2,
        ..tiny_config()
    };
    let model = Transformer::new(config, vb).unwrap();

    let x_enc = token_tensor(&[1, 2, 3], &device);
    let x_dec = token_tensor(&[0, 4], &device);

    let logits = model.forward(&x_enc, &x_dec, true).unwrap();
    assert_eq!(logits.dims3().unwrap(), (1, 2, 10));
}

#[test]
fn transformer_generates_bounded_sequence() {
    let device = Device::Cpu;
    let vb = var_builder(&device);
    let model = Transformer::new(tiny_config(), vb).unwrap();

    let x_enc = token_tensor(&[1, 2, 3], &device);
    let generated = model.generate(&x_enc, 0, 9, 5).unwrap();

    let (batch, seq_len) = generated.dims2().unwrap();
    assert_eq!(batch, 1);
    assert!(
        (2..=6).contains(&seq_len),
        "generated length {} outside [2, 6]",
        seq_len
    );

    let tokens = generated.to_vec2::<u32>().unwrap();
    assert_eq!(tokens[0][0], 0, "sequence must begin with the start token");
    assert!(
        tokens[0].iter().all(|&id| id < 10),
        "all tokens must lie in the decoder vocabulary"
    );
}

#[test]
fn transformer_repeated_generation_stays_valid() {
    let device = Device::Cpu;
    let vb = var_builder(&device);
    let model = Transformer::new(tiny_config(), vb).unwrap();

    let x_enc = token_tensor(&[4, 4], &device);
    for _ in 0..10 {
        let generated = model.generate(&x_enc, 0, 9, 6).unwrap();
        let (_, seq_len) = generated.dims2().unwrap();
        assert!(seq_len <= 7);

        let tokens = generated.to_vec2::<u32>().unwrap();
        // An end token may only appear as the final element
        for (i, &id) in tokens[0].iter().enumerate() {
            if id == 9 {
                assert_eq!(i, tokens[0].len() - 1, "generation must stop on end token");
            }
        }
    }
}

#[test]
fn transformer_rejects_zero_layers() {
    let device = Device::Cpu;
    let vb = var_builder(&device);
    let config = TransformerConfig {
        num_layers: 0,
        ..tiny_config()
    };
    assert!(Transformer::new(config, vb).is_err());
}

#[test]
fn transformer_rejects_oversized_inputs() {
    let device = Device::Cpu;
    let vb = var_builder(&device);
    let model = Transformer::new(tiny_config(), vb).unwrap();

    let too_long: Vec<u32> = (0..9u32).map(|i| i % 10).collect();
    let ok = token_tensor(&[0, 1], &device);

    assert!(model
        .forward(&token_tensor(&too_long, &device), &ok, false)
        .is_err());
    assert!(model
        .forward(&ok, &token_tensor(&too_long, &device), false)
        .is_err());
}

#[test]
fn transformer_supports_asymmetric_sides() {
    let device = Device::Cpu;
    let vb = var_builder(&device);
    let config = TransformerConfig {
        vocab_enc_size: 12,
        emb_enc_dim: 20,
        context_enc_size: 10,
        vocab_dec_size: 7,
        emb_dec_dim: 12,
        context_dec_size: 6,
        qk_dim: 5,
        num_heads: 3,
        num_layers: 2,
        dropout_rate: 0.0,
    };
    let model = Transformer::new(config, vb).unwrap();

    let x_enc = token_tensor(&[1, 5, 11, 3, 0, 2, 7], &device);
    let x_dec = token_tensor(&[0, 1, 2, 3], &device);

    let logits = model.forward(&x_enc, &x_dec, false).unwrap();
    assert_eq!(logits.dims3().unwrap(), (1, 4, 7));
}
