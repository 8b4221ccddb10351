use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use log::info;

use crate::error::{PrepareError, Result};

const USER_AGENT: &str = concat!("charprep/", env!("CARGO_PKG_VERSION"));

/// Where the raw corpus text comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// A UTF-8 text file on the local disk.
    File(PathBuf),
    /// A URL fetched with a single blocking HTTP GET.
    Url(String),
}

impl Source {
    /// Loads the whole corpus into memory as text, with `\r\n` and lone `\r`
    /// line endings turned into `\n`.
    pub fn load(&self) -> Result<String> {
        let bytes = match self {
            Source::File(path) => read_file_bytes(path)?,
            Source::Url(url) => fetch_url_bytes(url)?,
        };

        let text = String::from_utf8(bytes).map_err(|source| PrepareError::Decode {
            origin: self.describe(),
            source,
        })?;
        Ok(normalize_newlines(text))
    }

    pub fn describe(&self) -> String {
        match self {
            Source::File(path) => path.display().to_string(),
            Source::Url(url) => url.clone(),
        }
    }

    // file sources write their outputs next to the text file, just like
    // nanogpt's prepare scripts do; remote sources fall back to the cwd.
    pub fn default_output_dir(&self) -> PathBuf {
        match self {
            Source::File(path) => match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
            Source::Url(_) => PathBuf::from("."),
        }
    }
}

// Same line ending handling as reading the corpus in text mode: a CRLF
// corpus produces the same vocabulary and ids as its LF twin.
fn normalize_newlines(text: String) -> String {
    if !text.contains('\r') {
        return text;
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn read_file_bytes(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(PrepareError::SourceNotFound(path.to_path_buf()));
    }

    let read_err = |source| PrepareError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut source_bytes = Vec::new();
    let mut source_file = File::open(path).map_err(read_err)?;
    source_file.read_to_end(&mut source_bytes).map_err(read_err)?;
    info!("Loaded {} bytes from {:?}", source_bytes.len(), path);

    Ok(source_bytes)
}

fn fetch_url_bytes(url: &str) -> Result<Vec<u8>> {
    info!("Fetching {}", url);
    let resp = match ureq::get(url).set("User-Agent", USER_AGENT).call() {
        Ok(resp) => resp,
        Err(ureq::Error::Status(status, _)) => {
            return Err(PrepareError::FetchFailed {
                url: url.to_string(),
                status,
            })
        }
        Err(err) => {
            return Err(PrepareError::Transport {
                url: url.to_string(),
                source: Box::new(err),
            })
        }
    };

    // 4xx/5xx already came back as errors; this catches unfollowed 3xx replies.
    let status = resp.status();
    if !(200..300).contains(&status) {
        return Err(PrepareError::FetchFailed {
            url: url.to_string(),
            status,
        });
    }

    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .map_err(|source| PrepareError::BodyRead {
            url: url.to_string(),
            source,
        })?;
    info!("Fetched {} bytes from {}", body.len(), url);

    Ok(body)
}
