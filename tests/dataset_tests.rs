use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use nameformer::{build_dataset, to_tensors, CharVocab, Transformer, TransformerConfig};

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

#[test]
fn dataset_matches_reference_pairs() {
    let word_list = words(&["ab"]);
    let vocab = CharVocab::from_words(&word_list);
    let a = vocab.token_id('a').unwrap();
    let b = vocab.token_id('b').unwrap();

    let (xs, ys) = build_dataset(&word_list, &vocab, 1).unwrap();
    assert_eq!(xs, vec![vec![0], vec![a], vec![b]]);
    assert_eq!(ys, vec![a, b, 0]);
}

#[test]
fn dataset_pair_count_scales_with_word_length() {
    let word_list = words(&["anna", "bo"]);
    let vocab = CharVocab::from_words(&word_list);

    // Each word contributes len(word) + 1 pairs regardless of block size
    let (xs, ys) = build_dataset(&word_list, &vocab, 3).unwrap();
    assert_eq!(xs.len(), 5 + 3);
    assert_eq!(ys.len(), xs.len());
}

#[test]
fn dataset_feeds_the_model_end_to_end() {
    let device = Device::Cpu;
    let word_list = words(&["emma", "ava", "mia"]);
    let vocab = CharVocab::from_words(&word_list);

    let block_size = 3;
    let (xs, ys) = build_dataset(&word_list, &vocab, block_size).unwrap();
    let (inputs, targets) = to_tensors(&xs, &ys, block_size, &device).unwrap();
    assert_eq!(inputs.dims2().unwrap(), (xs.len(), block_size));
    assert_eq!(targets.dims1().unwrap(), ys.len());

    let config = TransformerConfig {
        vocab_enc_size: vocab.len(),
        vocab_dec_size: vocab.len(),
        emb_enc_dim: 16,
        emb_dec_dim: 16,
        context_enc_size: 8,
        context_dec_size: 8,
        qk_dim: 4,
        num_heads: 2,
        num_layers: 1,
        dropout_rate: 0.0,
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Transformer::new(config, vb).unwrap();

    // Contexts double as encoder conditioning and decoder input here; the
    // model only cares that the ids fit both vocabularies.
    let batch = inputs.narrow(0, 0, 2).unwrap();
    let logits = model.forward(&batch, &batch, false).unwrap();
    assert_eq!(logits.dims3().unwrap(), (2, block_size, vocab.len()));

    // Sampling a name from scratch: sentinel to sentinel
    let seed = batch.narrow(0, 0, 1).unwrap();
    let generated = model
        .generate(&seed, vocab.sentinel_id(), vocab.sentinel_id(), 6)
        .unwrap();
    let ids = generated.to_vec2::<u32>().unwrap();
    let name = vocab.decode(&ids[0]);
    assert!(name.starts_with('.'));
    assert!(ids[0].len() <= 7);
}
