use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Boundary character marking the start and end of every word.
pub const SENTINEL: char = '.';

/// Character vocabulary for the name dataset.
///
/// The sentinel `'.'` always occupies id 0; the remaining characters are
/// sorted and assigned ids starting at 1, so two vocabularies built from the
/// same word list are identical.
#[derive(Debug, Clone)]
pub struct CharVocab {
    /// Character to token-id mapping
    stoi: HashMap<char, u32>,
    /// Token-id to character mapping
    itos: Vec<char>,
}

impl CharVocab {
    /// Build the vocabulary from a word list.
    pub fn from_words(words: &[String]) -> Self {
        let chars: BTreeSet<char> = words
            .iter()
            .flat_map(|word| word.chars())
            .filter(|&c| c != SENTINEL)
            .collect();

        let mut itos = vec![SENTINEL];
        itos.extend(chars);

        let stoi = itos
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect();

        CharVocab { stoi, itos }
    }

    /// Number of tokens, sentinel included.
    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }

    /// Token id of the sentinel character.
    pub fn sentinel_id(&self) -> u32 {
        0
    }

    /// Look up the token id for a character.
    pub fn token_id(&self, c: char) -> Option<u32> {
        self.stoi.get(&c).copied()
    }

    /// Look up the character for a token id.
    pub fn char_for(&self, id: u32) -> Option<char> {
        self.itos.get(id as usize).copied()
    }

    /// Encode a word into token ids, failing on out-of-vocabulary characters.
    pub fn encode(&self, word: &str) -> Result<Vec<u32>> {
        word.chars()
            .map(|c| match self.token_id(c) {
                Some(id) => Ok(id),
                None => bail!("character {:?} is not in the vocabulary", c),
            })
            .collect()
    }

    /// Decode token ids back into a string, dropping unknown ids.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter().filter_map(|&id| self.char_for(id)).collect()
    }
}

/// Read a newline-separated word list from disk.
pub fn read_words<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let text = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read word list {}", path.as_ref().display()))?;

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Build (context, next-character) training pairs by sliding a window of
/// `block_size` over each word, padded with `block_size` sentinels in front
/// and one sentinel behind.
///
/// `X` holds the contexts (each of length `block_size`), `Y` the token the
/// model should predict after each context.
pub fn build_dataset(
    words: &[String],
    vocab: &CharVocab,
    block_size: usize,
) -> Result<(Vec<Vec<u32>>, Vec<u32>)> {
    if block_size == 0 {
        bail!("block_size must be greater than zero");
    }

    let mut xs = Vec::new();
    let mut ys = Vec::new();

    for word in words {
        let mut ids = vec![vocab.sentinel_id(); block_size];
        ids.extend(vocab.encode(word)?);
        ids.push(vocab.sentinel_id());

        for window in ids.windows(block_size + 1) {
            xs.push(window[..block_size].to_vec());
            ys.push(window[block_size]);
        }
    }

    Ok((xs, ys))
}

/// Upload dataset pairs as tensors: inputs `(N, block_size)`, targets `(N,)`.
pub fn to_tensors(
    xs: &[Vec<u32>],
    ys: &[u32],
    block_size: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    if xs.len() != ys.len() {
        bail!(
            "dataset is inconsistent: {} contexts but {} targets",
            xs.len(),
            ys.len()
        );
    }

    let flat: Vec<u32> = xs.iter().flatten().copied().collect();
    let inputs = Tensor::from_vec(flat, (xs.len(), block_size), device)?;
    let targets = Tensor::from_vec(ys.to_vec(), (ys.len(),), device)?;
    Ok((inputs, targets))
}
