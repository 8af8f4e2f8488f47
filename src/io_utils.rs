//! Input I/O: encoding resolution, delimiter resolution, and decoded line
//! reading for the streaming parse phase.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

pub const DEFAULT_CSV_DELIMITER: char = ',';
pub const DEFAULT_TSV_DELIMITER: char = '\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path) -> char {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    }
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

/// Streams one decoded line at a time without materializing the file. Line
/// terminators (`\n`, optionally preceded by `\r`) are stripped.
pub struct LineReader<R> {
    inner: R,
    buffer: Vec<u8>,
    encoding: &'static Encoding,
}

impl LineReader<BufReader<File>> {
    pub fn open(path: &Path, encoding: &'static Encoding) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        Ok(Self::new(BufReader::new(file), encoding))
    }
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            encoding,
        }
    }

    /// Returns the next line, or `None` at end of input.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        self.buffer.clear();
        let read = self
            .inner
            .read_until(b'\n', &mut self.buffer)
            .context("Reading input line")?;
        if read == 0 {
            return Ok(None);
        }
        if self.buffer.last() == Some(&b'\n') {
            self.buffer.pop();
        }
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        decode_bytes(&self.buffer, self.encoding).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_reader_strips_crlf_and_handles_missing_final_newline() {
        let input = b"first\r\nsecond\nthird".as_slice();
        let mut reader = LineReader::new(input, UTF_8);
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("first"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("second"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("third"));
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn delimiter_follows_extension() {
        assert_eq!(resolve_input_delimiter(Path::new("export.tsv")), '\t');
        assert_eq!(resolve_input_delimiter(Path::new("export.csv")), ',');
        assert_eq!(resolve_input_delimiter(Path::new("export")), ',');
    }

    #[test]
    fn unknown_encoding_label_is_rejected() {
        assert!(resolve_encoding(Some("not-a-real-encoding")).is_err());
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
    }
}
