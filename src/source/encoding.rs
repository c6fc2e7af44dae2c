//! Character encoding resolution and streaming decode.
//!
//! Input catalogs come from spreadsheets and older tools, so the encoding is
//! sniffed from a byte sample unless the user forces one. Resolution never
//! fails on bad input: low confidence falls back to a single-byte encoding in
//! which every byte decodes.
use anyhow::{anyhow, Context, Result};
use encoding_rs::{CoderResult, Decoder, Encoding};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Permissive single-byte encoding used when detection is not usable.
pub static FALLBACK_ENCODING: &Encoding = &encoding_rs::WINDOWS_1252_INIT;

/// Bytes inspected by the detector.
const SAMPLE_BYTES: u64 = 64 * 1024;

/// Detector confidence below which the guess is ignored.
const MIN_CONFIDENCE: f32 = 0.5;

const INPUT_CHUNK: usize = 8 * 1024;

/// How the encoding for a pass was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Override,
    ByteOrderMark,
    Detected,
    Fallback,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::ByteOrderMark => write!(f, "byte_order_mark"),
            Self::Detected => write!(f, "detected"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedEncoding {
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
    /// Detector confidence, when a detector ran.
    pub confidence: Option<f32>,
}

impl ResolvedEncoding {
    fn fallback(confidence: Option<f32>) -> Self {
        Self {
            encoding: FALLBACK_ENCODING,
            source: EncodingSource::Fallback,
            confidence,
        }
    }
}

/// Look up an encoding by WHATWG label (`latin-1`, `cp1252`, `utf-8`, ...).
pub fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| anyhow!("unknown encoding label {label:?}"))
}

/// Resolve the encoding for `path`, honoring a forced label first.
///
/// Only an unknown override label is an error; sampling failures fall back.
pub fn resolve_encoding(path: &Path, forced: Option<&str>) -> Result<ResolvedEncoding> {
    if let Some(label) = forced {
        let encoding = encoding_for_label(label).context("resolve --encoding")?;
        return Ok(ResolvedEncoding {
            encoding,
            source: EncodingSource::Override,
            confidence: None,
        });
    }
    match read_sample(path) {
        Ok(sample) => Ok(detect_encoding(&sample)),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %format!("{err:#}"),
                "encoding detection failed; using fallback"
            );
            Ok(ResolvedEncoding::fallback(None))
        }
    }
}

fn read_sample(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut sample = Vec::new();
    file.take(SAMPLE_BYTES)
        .read_to_end(&mut sample)
        .with_context(|| format!("read {}", path.display()))?;
    Ok(sample)
}

/// Pick an encoding for a byte sample.
pub fn detect_encoding(sample: &[u8]) -> ResolvedEncoding {
    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return ResolvedEncoding {
            encoding,
            source: EncodingSource::ByteOrderMark,
            confidence: None,
        };
    }
    let (charset, confidence, _language) = chardet::detect(sample);
    from_detection(&charset, confidence)
}

/// Map a detector verdict onto an `encoding_rs` encoding.
fn from_detection(charset: &str, confidence: f32) -> ResolvedEncoding {
    if confidence < MIN_CONFIDENCE || charset.is_empty() {
        return ResolvedEncoding::fallback(Some(confidence));
    }
    let label = chardet::charset2encoding(&charset.to_string()).to_string();
    match Encoding::for_label(label.as_bytes()).or_else(|| Encoding::for_label(charset.as_bytes()))
    {
        Some(encoding) => ResolvedEncoding {
            encoding,
            source: EncodingSource::Detected,
            confidence: Some(confidence),
        },
        None => ResolvedEncoding::fallback(Some(confidence)),
    }
}

/// `Read` adapter that transcodes any supported encoding to UTF-8.
///
/// Malformed input is replaced with U+FFFD. A leading BOM is consumed and
/// obeyed unless the encoding was forced.
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    input_start: usize,
    input_end: usize,
    output: Vec<u8>,
    output_start: usize,
    output_end: usize,
    eof: bool,
    finished: bool,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self::with_decoder(inner, encoding.new_decoder())
    }

    /// Reader for a resolved encoding. A forced encoding decodes BOM bytes
    /// like any other input.
    pub fn for_resolved(inner: R, resolved: &ResolvedEncoding) -> Self {
        match resolved.source {
            EncodingSource::Override => Self::with_decoder(
                inner,
                resolved.encoding.new_decoder_without_bom_handling(),
            ),
            _ => Self::new(inner, resolved.encoding),
        }
    }

    fn with_decoder(inner: R, decoder: Decoder) -> Self {
        Self {
            inner,
            decoder,
            input: vec![0; INPUT_CHUNK],
            input_start: 0,
            input_end: 0,
            output: vec![0; INPUT_CHUNK * 3 + 16],
            output_start: 0,
            output_end: 0,
            eof: false,
            finished: false,
        }
    }

    fn fill_output(&mut self) -> io::Result<()> {
        if self.input_start == self.input_end && !self.eof {
            let read = self.inner.read(&mut self.input)?;
            self.input_start = 0;
            self.input_end = read;
            if read == 0 {
                self.eof = true;
            }
        }
        let (result, read, written, _replaced) = self.decoder.decode_to_utf8(
            &self.input[self.input_start..self.input_end],
            &mut self.output,
            self.eof,
        );
        self.input_start += read;
        self.output_start = 0;
        self.output_end = written;
        if self.eof && result == CoderResult::InputEmpty {
            self.finished = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.output_start < self.output_end {
                let available = &self.output[self.output_start..self.output_end];
                let count = available.len().min(buf.len());
                buf[..count].copy_from_slice(&available[..count]);
                self.output_start += count;
                return Ok(count);
            }
            if self.finished {
                return Ok(0);
            }
            self.fill_output()?;
        }
    }
}
