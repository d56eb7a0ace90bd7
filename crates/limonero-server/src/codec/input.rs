//! Shared input preprocessing for text codecs
//!
//! `.gz` inputs are gunzipped (multi-member aware), then the byte stream is
//! transcoded to UTF-8. A UTF-8/UTF-16 byte order mark wins over the declared
//! encoding; without one the declared encoding (default UTF-8) applies.
//!
//! Transcoding is strict: the first byte sequence that is malformed in the
//! effective encoding fails the read with [`MalformedText`], which surfaces
//! as [`CodecError::Encoding`].

use super::{CodecError, CodecResult};
use crate::backend::Backend;
use encoding_rs::{Decoder, DecoderResult, Encoding};
use flate2::read::MultiGzDecoder;
use std::io::{self, BufReader, Read};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::io::SyncIoBridge;

const DECODE_BUFFER: usize = 8 * 1024;

/// Blocking reader over a backend object
pub type BlockingReader = Box<dyn Read + Send>;

pub fn is_gzip(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".gz")
}

/// Resolve an encoding label such as `utf-8`, `latin1` or `UTF-16LE`
pub fn resolve_encoding(label: Option<&str>) -> CodecResult<&'static Encoding> {
    match label.map(str::trim).filter(|l| !l.is_empty()) {
        None => Ok(encoding_rs::UTF_8),
        Some(label) => Encoding::for_label(label.as_bytes())
            .ok_or_else(|| CodecError::Encoding(format!("unknown encoding '{}'", label))),
    }
}

/// Wrap a raw byte reader with decompression and transcoding
pub fn decode_input<R>(raw: R, path: &str, encoding: Option<&str>) -> CodecResult<BlockingReader>
where
    R: Read + Send + 'static,
{
    let encoding = resolve_encoding(encoding)?;

    let bytes: BlockingReader = if is_gzip(path) {
        Box::new(MultiGzDecoder::new(BufReader::new(raw)))
    } else {
        Box::new(raw)
    };

    Ok(Box::new(StrictDecoder::new(bytes, encoding)))
}

/// Input bytes that are not valid in the encoding they are read with
#[derive(Debug, Error)]
#[error("invalid {encoding} byte sequence at offset {offset}")]
pub struct MalformedText {
    pub encoding: &'static str,
    pub offset: u64,
}

/// UTF-8 transcoding reader that refuses malformed input instead of
/// substituting U+FFFD
struct StrictDecoder<R> {
    inner: R,
    decoder: Decoder,
    input: Box<[u8]>,
    input_start: usize,
    input_end: usize,
    output: Box<[u8]>,
    output_start: usize,
    output_end: usize,
    consumed: u64,
    eof: bool,
    finished: bool,
}

impl<R: Read> StrictDecoder<R> {
    fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            input: vec![0; DECODE_BUFFER].into_boxed_slice(),
            input_start: 0,
            input_end: 0,
            output: vec![0; DECODE_BUFFER].into_boxed_slice(),
            output_start: 0,
            output_end: 0,
            consumed: 0,
            eof: false,
            finished: false,
        }
    }

    fn fill_input(&mut self) -> io::Result<()> {
        if self.input_start == self.input_end && !self.eof {
            let n = self.inner.read(&mut self.input)?;
            self.input_start = 0;
            self.input_end = n;
            self.eof = n == 0;
        }
        Ok(())
    }

    fn malformed(&self, bad_bytes: u8, after: u8) -> io::Error {
        let encoding = self.decoder.encoding().name();
        let offset = self.consumed.saturating_sub(u64::from(bad_bytes) + u64::from(after));
        io::Error::new(io::ErrorKind::InvalidData, MalformedText { encoding, offset })
    }
}

impl<R: Read> Read for StrictDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.output_start < self.output_end {
                let n = buf.len().min(self.output_end - self.output_start);
                buf[..n].copy_from_slice(&self.output[self.output_start..self.output_start + n]);
                self.output_start += n;
                return Ok(n);
            }
            if self.finished || buf.is_empty() {
                return Ok(0);
            }

            self.fill_input()?;
            let last = self.eof;
            let (result, read, written) = self.decoder.decode_to_utf8_without_replacement(
                &self.input[self.input_start..self.input_end],
                &mut self.output,
                last,
            );
            self.input_start += read;
            self.consumed += read as u64;
            self.output_start = 0;
            self.output_end = written;

            match result {
                DecoderResult::InputEmpty => self.finished = last,
                DecoderResult::OutputFull => {}
                DecoderResult::Malformed(bad, after) => return Err(self.malformed(bad, after)),
            }
        }
    }
}

/// Encoding failure carried inside an I/O error, if any
pub fn malformed_text(e: &io::Error) -> Option<&MalformedText> {
    e.get_ref().and_then(|inner| inner.downcast_ref::<MalformedText>())
}

/// Open `path` for blocking reads.
///
/// Must be called from within the runtime; the returned reader is meant to
/// be moved into `spawn_blocking`.
pub async fn open_blocking(backend: &Arc<dyn Backend>, path: &str) -> CodecResult<SyncIoBridge<crate::backend::ByteReader>> {
    let reader = backend.open_read(path).await?;
    Ok(SyncIoBridge::new(reader))
}

/// Run a blocking parse over the decoded text of `path`
pub async fn with_decoded_text<T, F>(
    backend: &Arc<dyn Backend>,
    path: &str,
    encoding: Option<&str>,
    parse: F,
) -> CodecResult<T>
where
    T: Send + 'static,
    F: FnOnce(BlockingReader) -> CodecResult<T> + Send + 'static,
{
    let bridge = open_blocking(backend, path).await?;
    let path = path.to_string();
    let encoding = encoding.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        let input = decode_input(bridge, &path, encoding.as_deref())?;
        parse(input)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    fn read_all(path: &str, bytes: Vec<u8>, encoding: Option<&str>) -> String {
        let mut out = String::new();
        decode_input(Cursor::new(bytes), path, encoding)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_plain_utf8_passes_through() {
        assert_eq!(read_all("a.csv", "id,nome\n1,João\n".as_bytes().to_vec(), None), "id,nome\n1,João\n");
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"a,b\n");
        assert_eq!(read_all("a.csv", bytes, None), "a,b\n");
    }

    #[test]
    fn test_utf16_bom_overrides_declared_encoding() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "x,y\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(read_all("a.csv", bytes, Some("latin1")), "x,y\n");
    }

    #[test]
    fn test_declared_latin1() {
        assert_eq!(read_all("a.csv", vec![b'J', b'o', 0xE3, b'o'], Some("ISO-8859-1")), "João");
    }

    #[test]
    fn test_unknown_encoding_is_rejected() {
        let err = decode_input(Cursor::new(Vec::new()), "a.csv", Some("klingon")).err().unwrap();
        assert!(matches!(err, CodecError::Encoding(_)));
    }

    #[test]
    fn test_invalid_utf8_is_an_encoding_error() {
        let mut out = String::new();
        let err = decode_input(Cursor::new(b"name\n\xff\xfeabc\n".to_vec()), "a.csv", None)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap_err();
        let malformed = malformed_text(&err).unwrap();
        assert_eq!(malformed.encoding, "UTF-8");
        assert_eq!(malformed.offset, 5);
        assert!(matches!(CodecError::from(err), CodecError::Encoding(_)));
    }

    #[test]
    fn test_truncated_sequence_at_end_is_rejected() {
        let mut out = String::new();
        let err = decode_input(Cursor::new(vec![b'a', 0xC3]), "a.csv", None)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap_err();
        assert!(malformed_text(&err).is_some());
    }

    #[test]
    fn test_input_larger_than_decode_buffer() {
        let text = "ação,".repeat(DECODE_BUFFER);
        assert_eq!(read_all("a.csv", text.clone().into_bytes(), None), text);
    }

    #[test]
    fn test_multi_member_gzip() {
        let mut bytes = gzip(b"a,b\n");
        bytes.extend(gzip(b"1,2\n"));
        assert_eq!(read_all("data.csv.gz", bytes, None), "a,b\n1,2\n");
    }
}
