use std::io::{self, Cursor, Read, Write};

use brotli::{CompressorWriter, Decompressor};
use encoding_rs::Encoding;
use flate2::{
    Compression,
    read::{GzDecoder, ZlibDecoder},
    write::{GzEncoder, ZlibEncoder},
};
use tracing::warn;
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::error::{PipelineError, TranscodeError};

/// Charset assumed when `Content-Type` does not declare one.
pub const DEFAULT_CHARSET: &str = "ISO-8859-1";

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentCoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl ContentCoding {
    pub fn from_header(value: Option<&str>) -> io::Result<Self> {
        match value.map(|enc| enc.trim().to_ascii_lowercase()) {
            None => Ok(Self::Identity),
            Some(enc) => match enc.as_str() {
                "" | "identity" => Ok(Self::Identity),
                "gzip" | "x-gzip" => Ok(Self::Gzip),
                "deflate" => Ok(Self::Deflate),
                "br" => Ok(Self::Brotli),
                "zstd" => Ok(Self::Zstd),
                other => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported content-encoding: {}", other),
                )),
            },
        }
    }

    pub fn decode(self, bytes: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::Identity => out.extend_from_slice(bytes),
            Self::Gzip => {
                GzDecoder::new(Cursor::new(bytes)).read_to_end(&mut out)?;
            }
            Self::Deflate => {
                ZlibDecoder::new(Cursor::new(bytes)).read_to_end(&mut out)?;
            }
            Self::Brotli => {
                Decompressor::new(Cursor::new(bytes), BROTLI_BUFFER_SIZE).read_to_end(&mut out)?;
            }
            Self::Zstd => {
                ZstdDecoder::new(Cursor::new(bytes))?.read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }

    pub fn encode(self, bytes: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(bytes.to_vec()),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(bytes)?;
                encoder.finish()
            }
            Self::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(bytes)?;
                encoder.finish()
            }
            Self::Brotli => {
                let mut encoder = CompressorWriter::new(
                    Vec::new(),
                    BROTLI_BUFFER_SIZE,
                    BROTLI_QUALITY,
                    BROTLI_WINDOW,
                );
                encoder.write_all(bytes)?;
                encoder.flush()?;
                Ok(encoder.into_inner())
            }
            Self::Zstd => zstd::stream::encode_all(Cursor::new(bytes), 0),
        }
    }
}

/// Everything after `charset=`, verbatim.
pub fn declared_charset(content_type: &str) -> &str {
    match content_type.find("charset=") {
        Some(idx) => &content_type[idx + "charset=".len()..],
        None => DEFAULT_CHARSET,
    }
}

pub fn transcode(bytes: &[u8], charset: &str) -> Result<(String, &'static Encoding), TranscodeError> {
    let encoding = Encoding::for_label(charset.as_bytes()).ok_or_else(|| TranscodeError {
        charset: charset.to_string(),
    })?;
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        warn!(charset, "lossy decoding: some bytes could not be decoded");
    }
    Ok((text.into_owned(), encoding))
}

/// A response body normalized to UTF-8 text.
#[derive(Debug)]
pub struct Decoded {
    pub text: String,
    pub coding: ContentCoding,
    /// Set when the body was transcoded from a declared charset.
    pub charset: Option<&'static Encoding>,
}

pub fn decode_body(
    raw: &[u8],
    content_encoding: Option<&str>,
    content_type: &str,
) -> Result<Decoded, PipelineError> {
    let coding = ContentCoding::from_header(content_encoding).map_err(PipelineError::Decode)?;
    let bytes = coding.decode(raw).map_err(PipelineError::Decode)?;

    let charset = declared_charset(content_type);
    if charset.eq_ignore_ascii_case("utf-8") {
        return Ok(Decoded {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            coding,
            charset: None,
        });
    }

    match transcode(&bytes, charset) {
        Ok((text, encoding)) => Ok(Decoded {
            text,
            coding,
            charset: Some(encoding),
        }),
        Err(err) => {
            warn!(%err, content_type, "reading body untranscoded");
            Ok(Decoded {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                coding,
                charset: None,
            })
        }
    }
}
