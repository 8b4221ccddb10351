use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use dataset::{load_tokens, split_tokens, write_tokens, SplitConfig, TokenWidth};
use error::PrepareError;
use log::{error, info};
use source::Source;
use std::{path::PathBuf, process::exit};
use vocab::{load_vocab_meta, VocabMeta};

mod dataset;
mod error;
mod source;
mod vocab;

const TRAINING_FILENAME: &str = "train.bin";
const VALIDATION_FILENAME: &str = "val.bin";
const VOCAB_FILENAME: &str = "vocab.json";

// Clap provides an easy to use way of parsing command-line options by just
// creating a struct and labelling the members with attributes to control
// the parsing behavior.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["prepare_dataset", "prepare_dataset_url"]),
))]
struct Args {
    #[arg(
        long,
        value_name = "Text-Dataset-File",
        help = "Prepares the source text file by tokenizing it all at character-level."
    )]
    pub prepare_dataset: Option<PathBuf>,

    #[arg(
        long,
        value_name = "Text-Dataset-URL",
        help = "Downloads the source text and tokenizes it all at character-level."
    )]
    pub prepare_dataset_url: Option<String>,

    #[arg(
        long,
        value_name = "Output-Directory",
        help = "Where train.bin, val.bin and vocab.json get written. Defaults to the source file's directory, or the current directory for URLs."
    )]
    pub output_dir: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = 0.9,
        help = "Fraction of the text, from the start, used for the training dataset."
    )]
    pub train_fraction: f64,

    #[arg(
        long,
        default_value_t = 0.1,
        help = "Fraction of the text where the validation dataset starts; it runs to the end of the text."
    )]
    pub val_start_fraction: f64,

    #[arg(
        long,
        help = "Start the validation dataset where the training dataset ends so they don't overlap."
    )]
    pub disjoint_split: bool,

    #[arg(
        long,
        value_enum,
        default_value_t = TokenWidth::U16,
        help = "Integer width of each token id in the binary dataset files."
    )]
    pub token_width: TokenWidth,

    #[arg(
        long,
        help = "Read the written files back and check they decode to the source text."
    )]
    pub verify: bool,
}

/// Everything the preparation pipeline needs to run.
#[derive(Clone, Debug)]
pub struct PrepareConfig {
    pub source: Source,
    pub output_dir: PathBuf,
    pub split: SplitConfig,
    pub token_width: TokenWidth,
    pub verify: bool,
}

impl PrepareConfig {
    fn from_args(args: &Args) -> Result<Self> {
        let source = match (&args.prepare_dataset, &args.prepare_dataset_url) {
            (Some(path), None) => Source::File(path.clone()),
            (None, Some(url)) => Source::Url(url.clone()),
            _ => {
                return Err(PrepareError::InvalidConfig(
                    "pass exactly one of --prepare-dataset or --prepare-dataset-url".to_string(),
                )
                .into())
            }
        };
        let output_dir = args
            .output_dir
            .clone()
            .unwrap_or_else(|| source.default_output_dir());
        let split = SplitConfig {
            train_fraction: args.train_fraction,
            val_start_fraction: args.val_start_fraction,
            disjoint: args.disjoint_split,
        };
        split.validate()?;

        Ok(Self {
            source,
            output_dir,
            split,
            token_width: args.token_width,
            verify: args.verify,
        })
    }
}

/// Paths of the files written by a successful run. The source text is only
/// held on to when the run is going to be verified.
#[derive(Debug)]
pub struct PreparedDataset {
    pub training_filepath: PathBuf,
    pub validation_filepath: PathBuf,
    pub vocab_filepath: PathBuf,
    pub source_text: Option<String>,
}

fn main() {
    // setup our logging interface; RUST_LOG can still override the level.
    let mut builder = env_logger::Builder::new();
    builder.filter(None, log::LevelFilter::Info);
    builder.parse_default_env();
    builder.init();

    // parse in the command line options all derived from the Args struct.
    let args = Args::parse();

    if let Err(err) = run(&args) {
        error!("{err:#}");
        exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = PrepareConfig::from_args(args)?;
    let prepared = prepare_dataset(&config)
        .with_context(|| format!("Unable to prepare a dataset from {}", config.source.describe()))?;

    if config.verify {
        verify_dataset(&prepared, &config)?;
        info!("Verified the written dataset decodes back to the source text.");
    }
    Ok(())
}

// This loads the source text, builds a character-level vocabulary out of it,
// encodes the whole text, splits the ids into training and validation sets
// and then writes them out as "train.bin" and "val.bin" with the vocabulary
// going to "vocab.json". Nothing is written unless the source loads cleanly.
fn prepare_dataset(config: &PrepareConfig) -> std::result::Result<PreparedDataset, PrepareError> {
    let start_time = std::time::Instant::now();

    // load up the text from the source into one buffer to tokenize.
    let data = config.source.load()?;
    let n = data.chars().count();
    info!("Length of dataset in characters: {}", n);

    // get all the unique characters that occur in this text
    let vocab = VocabMeta::from_text(&data);
    info!("Unique characters: {}", vocab.chars());
    info!("Vocabulary size: {}", vocab.vocab_size);
    config.token_width.check_vocab_size(vocab.vocab_size)?;

    // use the lookup table to encode the text into ids and then carve out
    // the two datasets. one id per character, so slicing the ids is the
    // same as slicing the text.
    let ids = vocab.encode_string(&data)?;
    let (training_ids, validation_ids) = split_tokens(&ids, &config.split);
    info!(
        "Training token count: {} ; Validation token count: {}",
        training_ids.len(),
        validation_ids.len()
    );

    // finally write out the bytes to the respective files
    std::fs::create_dir_all(&config.output_dir).map_err(|source| PrepareError::Write {
        path: config.output_dir.clone(),
        source,
    })?;
    let training_filepath = config.output_dir.join(TRAINING_FILENAME);
    write_tokens(&training_filepath, training_ids, config.token_width)?;

    let validation_filepath = config.output_dir.join(VALIDATION_FILENAME);
    write_tokens(&validation_filepath, validation_ids, config.token_width)?;

    // write out the vocab metadata
    let vocab_filepath = config.output_dir.join(VOCAB_FILENAME);
    vocab.save(&vocab_filepath)?;

    info!(
        "Dataset prepared successfully in {:.2} seconds.",
        start_time.elapsed().as_secs_f32()
    );
    info!("Training bytes: {:?}", training_filepath);
    info!("Validation bytes: {:?}", validation_filepath);
    info!("Vocabulary metadata: {:?}", vocab_filepath);

    Ok(PreparedDataset {
        training_filepath,
        validation_filepath,
        vocab_filepath,
        source_text: config.verify.then_some(data),
    })
}

// Reads the written dataset back off of disk and makes sure both token files
// decode to exactly the text slices they were built from.
fn verify_dataset(
    prepared: &PreparedDataset,
    config: &PrepareConfig,
) -> std::result::Result<(), PrepareError> {
    let text = prepared.source_text.as_deref().ok_or_else(|| {
        PrepareError::InvalidConfig("the source text wasn't kept for verification".to_string())
    })?;
    let vocab = load_vocab_meta(&prepared.vocab_filepath)?;

    let training_tokens = load_tokens(&prepared.training_filepath, config.token_width)?;
    let validation_tokens = load_tokens(&prepared.validation_filepath, config.token_width)?;
    let (train_end, val_start) = config.split.boundaries(text.chars().count());

    if !vocab
        .decode_tokens(&training_tokens)?
        .chars()
        .eq(text.chars().take(train_end))
    {
        return Err(PrepareError::VerifyFailed(prepared.training_filepath.clone()));
    }
    if !vocab
        .decode_tokens(&validation_tokens)?
        .chars()
        .eq(text.chars().skip(val_start))
    {
        return Err(PrepareError::VerifyFailed(prepared.validation_filepath.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn file_config(source: &Path, output_dir: &Path) -> PrepareConfig {
        PrepareConfig {
            source: Source::File(source.to_path_buf()),
            output_dir: output_dir.to_path_buf(),
            split: SplitConfig::default(),
            token_width: TokenWidth::U16,
            verify: true,
        }
    }

    #[test]
    fn abcabc_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "abcabc").unwrap();
        let out = dir.path().join("out");

        let config = file_config(&input, &out);
        let prepared = prepare_dataset(&config).unwrap();

        let train = std::fs::read(out.join("train.bin")).unwrap();
        assert_eq!(train, vec![0, 0, 1, 0, 2, 0, 0, 0, 1, 0]);
        let val = load_tokens(&out.join("val.bin"), TokenWidth::U16).unwrap();
        assert_eq!(val, vec![0, 1, 2, 0, 1, 2]);

        let vocab = load_vocab_meta(&out.join("vocab.json")).unwrap();
        assert_eq!(vocab.vocab_size, 3);
        assert_eq!(vocab.chars(), "abc");

        assert_eq!(prepared.source_text.as_deref(), Some("abcabc"));
        verify_dataset(&prepared, &config).unwrap();
    }

    #[test]
    fn empty_corpus_writes_empty_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "").unwrap();

        let config = file_config(&input, dir.path());
        let prepared = prepare_dataset(&config).unwrap();

        assert_eq!(std::fs::metadata(&prepared.training_filepath).unwrap().len(), 0);
        assert_eq!(std::fs::metadata(&prepared.validation_filepath).unwrap().len(), 0);
        let vocab = load_vocab_meta(&prepared.vocab_filepath).unwrap();
        assert_eq!(vocab.vocab_size, 0);
        assert!(vocab.itos.is_empty());
        assert!(vocab.stoi.is_empty());
        verify_dataset(&prepared, &config).unwrap();
    }

    #[test]
    fn url_404_aborts_before_writing_anything() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let (url, server) = source::tests::serve_once("404 Not Found", b"");

        let config = PrepareConfig {
            source: Source::Url(url),
            output_dir: out.clone(),
            split: SplitConfig::default(),
            token_width: TokenWidth::U16,
            verify: false,
        };
        let err = prepare_dataset(&config).unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, PrepareError::FetchFailed { status: 404, .. }));
        assert!(!out.exists());
    }

    #[test]
    fn url_source_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let text = "To be, or not to be: that is the question.\n";
        let (url, server) = source::tests::serve_once("200 OK", text.as_bytes());

        let config = PrepareConfig {
            source: Source::Url(url),
            output_dir: dir.path().to_path_buf(),
            split: SplitConfig::default(),
            token_width: TokenWidth::U32,
            verify: true,
        };
        let prepared = prepare_dataset(&config).unwrap();
        server.join().unwrap();

        let n = text.chars().count();
        let train = load_tokens(&prepared.training_filepath, TokenWidth::U32).unwrap();
        let val = load_tokens(&prepared.validation_filepath, TokenWidth::U32).unwrap();
        assert_eq!(train.len(), (n as f64 * 0.9) as usize);
        assert_eq!(val.len(), n - (n as f64 * 0.1) as usize);
        verify_dataset(&prepared, &config).unwrap();
    }

    #[test]
    fn crlf_corpus_matches_its_lf_twin() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "ab\r\nab\r\n").unwrap();

        let config = file_config(&input, dir.path());
        let prepared = prepare_dataset(&config).unwrap();

        let vocab = load_vocab_meta(&prepared.vocab_filepath).unwrap();
        assert_eq!(vocab.chars(), "\nab");
        assert_eq!(vocab.vocab_size, 3);
        assert_eq!(prepared.source_text.as_deref().map(|t| t.chars().count()), Some(6));

        // n = 6: train is [0, 5) and validation starts at 0
        let train = load_tokens(&prepared.training_filepath, TokenWidth::U16).unwrap();
        let val = load_tokens(&prepared.validation_filepath, TokenWidth::U16).unwrap();
        assert_eq!(train, vec![1, 2, 0, 1, 2]);
        assert_eq!(val, vec![1, 2, 0, 1, 2, 0]);
        verify_dataset(&prepared, &config).unwrap();
    }

    #[test]
    fn plain_run_does_not_keep_the_source_text() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "abcabc").unwrap();

        let config = PrepareConfig {
            verify: false,
            ..file_config(&input, dir.path())
        };
        let prepared = prepare_dataset(&config).unwrap();
        assert!(prepared.source_text.is_none());
        assert!(matches!(
            verify_dataset(&prepared, &config),
            Err(PrepareError::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_source_file_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.txt");

        let err = prepare_dataset(&file_config(&input, dir.path())).unwrap_err();
        assert!(format!("{err}").contains("missing.txt"));
        assert!(!dir.path().join("train.bin").exists());
    }

    #[test]
    fn rerunning_produces_identical_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "Ünïcödé text with a tab\tand a 🦀\n").unwrap();

        let config = file_config(&input, dir.path());
        let first = prepare_dataset(&config).unwrap();
        let vocab_a = std::fs::read(&first.vocab_filepath).unwrap();
        let train_a = std::fs::read(&first.training_filepath).unwrap();

        let second = prepare_dataset(&config).unwrap();
        assert_eq!(vocab_a, std::fs::read(&second.vocab_filepath).unwrap());
        assert_eq!(train_a, std::fs::read(&second.training_filepath).unwrap());
    }

    #[test]
    fn verify_catches_tampered_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "hello world, hello rust").unwrap();

        let config = file_config(&input, dir.path());
        let prepared = prepare_dataset(&config).unwrap();
        write_tokens(&prepared.validation_filepath, &[0, 1], TokenWidth::U16).unwrap();

        assert!(matches!(
            verify_dataset(&prepared, &config),
            Err(PrepareError::VerifyFailed(_))
        ));
    }

    #[test]
    fn args_become_a_config() {
        let args = Args::parse_from([
            "charprep",
            "--prepare-dataset",
            "data/shakespeare_char/input.txt",
            "--disjoint-split",
            "--token-width",
            "u32",
        ]);
        let config = PrepareConfig::from_args(&args).unwrap();
        assert_eq!(
            config.source,
            Source::File(PathBuf::from("data/shakespeare_char/input.txt"))
        );
        assert_eq!(config.output_dir, PathBuf::from("data/shakespeare_char"));
        assert!(config.split.disjoint);
        assert_eq!(config.token_width, TokenWidth::U32);
        assert!(!config.verify);
    }

    #[test]
    fn args_need_exactly_one_source() {
        assert!(Args::try_parse_from(["charprep"]).is_err());
        assert!(Args::try_parse_from([
            "charprep",
            "--prepare-dataset",
            "input.txt",
            "--prepare-dataset-url",
            "http://localhost/input.txt",
        ])
        .is_err());
    }

    #[test]
    fn bad_fractions_are_rejected() {
        let args = Args::parse_from([
            "charprep",
            "--prepare-dataset-url",
            "http://localhost/input.txt",
            "--train-fraction",
            "1.2",
        ]);
        assert!(PrepareConfig::from_args(&args).is_err());
    }
}
