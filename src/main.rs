use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};

use nameformer::{
    build_dataset, read_words, setup_device, to_tensors, CharVocab, Transformer,
    TransformerConfig,
};

const BLOCK_SIZE: usize = 3;
const SAMPLES: usize = 5;

fn main() -> anyhow::Result<()> {
    println!("Character-level name transformer in Rust!");

    let device = setup_device()?;

    // Word list: path from the command line, small built-in fallback otherwise
    let words = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading words from {}...", path);
            read_words(&path)?
        }
        None => {
            println!("No word list given, using the built-in sample");
            ["emma", "olivia", "ava", "isabella", "sophia", "mia", "amelia"]
                .iter()
                .map(|w| w.to_string())
                .collect()
        }
    };

    let vocab = CharVocab::from_words(&words);
    println!(
        "Loaded {} words, vocabulary of {} characters",
        words.len(),
        vocab.len()
    );

    // Sliding-window training pairs, the sole data source for the model
    let (xs, ys) = build_dataset(&words, &vocab, BLOCK_SIZE)?;
    let (inputs, targets) = to_tensors(&xs, &ys, BLOCK_SIZE, &device)?;
    println!(
        "Dataset: {} pairs, inputs {:?}, targets {:?}",
        xs.len(),
        inputs.shape(),
        targets.shape()
    );

    let config = TransformerConfig {
        vocab_enc_size: vocab.len(),
        vocab_dec_size: vocab.len(),
        ..TransformerConfig::default()
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Transformer::new(config, vb)?;
    println!("Model built with {} parameters", model.count_parameters());

    // Condition the encoder on the first word and sample a few names.
    // Weights are freshly initialized, so the output is random babble until
    // a training loop is layered on top.
    let seed_word = &words[0];
    let mut seed_ids = vocab.encode(seed_word)?;
    seed_ids.truncate(model.config().context_enc_size);
    let x_enc = Tensor::from_vec(seed_ids.clone(), (1, seed_ids.len()), &device)?;

    println!("Sampling {} names conditioned on '{}':", SAMPLES, seed_word);
    let sentinel = vocab.sentinel_id();
    for i in 0..SAMPLES {
        let generated = model.generate(&x_enc, sentinel, sentinel, 12)?;
        let ids = generated.to_vec2::<u32>()?;
        let name: String = vocab.decode(&ids[0]);
        println!("  {}. {}", i + 1, name.trim_matches('.'));
    }

    Ok(())
}
