use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::BufReader,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::{PrepareError, Result};

// This represents the vocabulary metadata used when preparing the dataset.
// Both lookup directions get written out so that downstream consumers can
// decode tokens without rebuilding anything. Ordered maps keep the json
// byte-identical between runs over the same corpus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabMeta {
    pub vocab_size: usize,

    pub itos: BTreeMap<u32, char>,

    pub stoi: BTreeMap<char, u32>,
}

impl VocabMeta {
    /// Builds the vocabulary from every distinct character in `text`, with ids
    /// assigned in codepoint order.
    pub fn from_text(text: &str) -> Self {
        let chars: BTreeSet<char> = text.chars().collect();

        let mut stoi = BTreeMap::new();
        let mut itos = BTreeMap::new();
        for (i, c) in chars.into_iter().enumerate() {
            stoi.insert(c, i as u32);
            itos.insert(i as u32, c);
        }

        Self {
            vocab_size: stoi.len(),
            itos,
            stoi,
        }
    }

    /// The vocabulary characters, sorted by id.
    pub fn chars(&self) -> String {
        self.itos.values().collect()
    }

    pub fn encode_string(&self, s: &str) -> Result<Vec<u32>> {
        s.chars()
            .enumerate()
            .map(|(position, c)| {
                self.stoi
                    .get(&c)
                    .copied()
                    .ok_or(PrepareError::UnknownChar { ch: c, position })
            })
            .collect()
    }

    pub fn decode_tokens(&self, tokens: &[u32]) -> Result<String> {
        tokens
            .iter()
            .enumerate()
            .map(|(position, &id)| {
                self.itos
                    .get(&id)
                    .copied()
                    .ok_or(PrepareError::UnknownId { id, position })
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let vocab_data_json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, vocab_data_json).map_err(|source| PrepareError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    // both maps have to agree with each other and with vocab_size, otherwise
    // decoding would silently produce garbage.
    fn validate(&self) -> Result<()> {
        if self.itos.len() != self.vocab_size || self.stoi.len() != self.vocab_size {
            return Err(PrepareError::InvalidMetadata(format!(
                "vocab_size is {} but itos has {} entries and stoi has {}",
                self.vocab_size,
                self.itos.len(),
                self.stoi.len()
            )));
        }
        for (id, c) in &self.itos {
            if *id as usize >= self.vocab_size {
                return Err(PrepareError::InvalidMetadata(format!(
                    "id {} is outside of the vocabulary range",
                    id
                )));
            }
            if self.stoi.get(c) != Some(id) {
                return Err(PrepareError::InvalidMetadata(format!(
                    "itos maps {} to {:?} but stoi disagrees",
                    id, c
                )));
            }
        }
        Ok(())
    }
}

pub fn load_vocab_meta(path: &Path) -> Result<VocabMeta> {
    let f = File::open(path).map_err(|source| PrepareError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let bf = BufReader::new(f);
    let meta: VocabMeta = serde_json::from_reader(bf)?;
    meta.validate()?;

    Ok(meta)
}
