use std::{
    fmt,
    fs::File,
    io::{BufReader, Read, Write},
    path::Path,
};

use clap::ValueEnum;

use crate::error::{PrepareError, Result};

/// Integer width used for each token id in the binary dataset files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TokenWidth {
    #[default]
    U16,
    U32,
}

impl TokenWidth {
    pub fn bytes(self) -> usize {
        match self {
            TokenWidth::U16 => 2,
            TokenWidth::U32 => 4,
        }
    }

    // the number of distinct ids that can be stored, so a vocabulary of
    // exactly 65536 characters still fits in u16.
    pub fn max_vocab_size(self) -> u64 {
        match self {
            TokenWidth::U16 => u16::MAX as u64 + 1,
            TokenWidth::U32 => u32::MAX as u64 + 1,
        }
    }

    pub fn check_vocab_size(self, vocab_size: usize) -> Result<()> {
        if vocab_size as u64 > self.max_vocab_size() {
            return Err(PrepareError::VocabTooLarge {
                vocab_size,
                width: self,
            });
        }
        Ok(())
    }
}

impl fmt::Display for TokenWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenWidth::U16 => write!(f, "u16"),
            TokenWidth::U32 => write!(f, "u32"),
        }
    }
}

/// Where the training and validation slices get cut from the full token stream.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitConfig {
    /// Training covers `[0, floor(train_fraction * n))`.
    pub train_fraction: f64,

    /// Validation covers `[floor(val_start_fraction * n), n)`. With the default
    /// 0.9 / 0.1 pair the two slices overlap in the middle 80%.
    pub val_start_fraction: f64,

    /// Start validation at the training boundary instead, making the two
    /// slices a true partition. `val_start_fraction` is ignored when set.
    pub disjoint: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.9,
            val_start_fraction: 0.1,
            disjoint: false,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("train fraction", self.train_fraction),
            ("validation start fraction", self.val_start_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PrepareError::InvalidConfig(format!(
                    "the {} must be between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Returns the `(train_end, val_start)` positions for a stream of `n` tokens.
    pub fn boundaries(&self, n: usize) -> (usize, usize) {
        let train_end = fraction_of(n, self.train_fraction);
        let val_start = if self.disjoint {
            train_end
        } else {
            fraction_of(n, self.val_start_fraction)
        };
        (train_end, val_start)
    }
}

fn fraction_of(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction) as usize).min(n)
}

/// Splits the encoded corpus into its training and validation slices.
pub fn split_tokens<'a>(ids: &'a [u32], split: &SplitConfig) -> (&'a [u32], &'a [u32]) {
    let (train_end, val_start) = split.boundaries(ids.len());
    (&ids[..train_end], &ids[val_start..])
}

/// Writes the tokens as a flat little-endian array with no header,
/// overwriting anything already at `path`.
pub fn write_tokens(path: &Path, tokens: &[u32], width: TokenWidth) -> Result<()> {
    let write_err = |source| PrepareError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut token_bytes = Vec::with_capacity(tokens.len() * width.bytes());
    for &token in tokens {
        match width {
            TokenWidth::U16 => {
                let t = u16::try_from(token).map_err(|_| PrepareError::VocabTooLarge {
                    vocab_size: token as usize + 1,
                    width,
                })?;
                token_bytes.extend_from_slice(&t.to_le_bytes());
            }
            TokenWidth::U32 => token_bytes.extend_from_slice(&token.to_le_bytes()),
        }
    }

    let mut token_file = File::create(path).map_err(write_err)?;
    token_file.write_all(&token_bytes).map_err(write_err)?;
    token_file.flush().map_err(write_err)?;
    Ok(())
}

pub fn load_tokens(path: &Path, width: TokenWidth) -> Result<Vec<u32>> {
    let read_err = |source| PrepareError::Read {
        path: path.to_path_buf(),
        source,
    };
    let f = File::open(path).map_err(read_err)?;
    let mut bf = BufReader::new(f);
    let mut token_bytes = Vec::new();
    bf.read_to_end(&mut token_bytes).map_err(read_err)?;

    if token_bytes.len() % width.bytes() != 0 {
        return Err(PrepareError::CorruptTokenFile {
            path: path.to_path_buf(),
            len: token_bytes.len(),
            width,
        });
    }

    let data: Vec<u32> = match width {
        TokenWidth::U16 => token_bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32)
            .collect(),
        TokenWidth::U32 => token_bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    };
    Ok(data)
}
