//! Response decompression for HTTP content encoding.
//!
//! CalDAV servers routinely compress large multistatus bodies; this module
//! detects the `Content-Encoding` header and decompresses response bodies
//! before XML parsing. The caller's size cap is enforced while decoding,
//! so neither an oversized identity body nor a decompression bomb is ever
//! fully materialized in memory.

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZstdDecoder};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::BodyStream;
use hyper::body::Incoming;
use hyper::{HeaderMap, header, http};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;

/// Supported content encodings for response decompression.
///
/// These values correspond to the `Content-Encoding` header and are used to
/// decide how to wrap the body reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Br,
    Gzip,
    Zstd,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Br => "br",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Zstd => "zstd",
        }
    }
}

/// Failure while draining a response body.
#[derive(Debug, Error)]
pub enum BodyError {
    /// The decoded body ran past the caller's cap.
    #[error("response body exceeds the {limit} byte cap")]
    TooLarge { limit: usize },

    #[error("body read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Detect the response `Content-Encoding` header and map it to [`ContentEncoding`].
///
/// Returns [`ContentEncoding::Identity`] if the header is missing or not recognized.
pub fn detect_encoding(headers: &HeaderMap) -> ContentEncoding {
    if let Some(val) = headers.get(header::CONTENT_ENCODING)
        && let Ok(s) = val.to_str()
    {
        let enc = s
            .split(',')
            .next()
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_default();
        return match enc.as_str() {
            "br" => ContentEncoding::Br,
            "gzip" => ContentEncoding::Gzip,
            "zstd" | "zst" => ContentEncoding::Zstd,
            _ => ContentEncoding::Identity,
        };
    }
    ContentEncoding::Identity
}

/// Insert an `Accept-Encoding` header (`br, zstd, gzip`) if not already present.
pub fn add_accept_encoding(h: &mut HeaderMap) {
    if !h.contains_key(http::header::ACCEPT_ENCODING) {
        h.insert(
            http::header::ACCEPT_ENCODING,
            http::HeaderValue::from_static("br, zstd, gzip"),
        );
    }
}

/// Decompress a response body, erroring as soon as the decoded size runs
/// past `max_bytes`.
///
/// The cap applies to the bytes coming out of the decoder, which is what a
/// decompression bomb inflates; the check happens per chunk, before the
/// chunk is retained.
pub async fn decompress_body(
    body: Incoming,
    encoding: ContentEncoding,
    max_bytes: usize,
) -> Result<Bytes, BodyError> {
    let stream = BodyStream::new(body)
        .map_ok(|frame| frame.into_data().unwrap_or_default())
        .map_err(std::io::Error::other);
    let reader = BufReader::new(StreamReader::new(stream));
    let mut reader: Box<dyn AsyncRead + Unpin + Send> = match encoding {
        ContentEncoding::Identity => Box::new(reader),
        ContentEncoding::Br => Box::new(BrotliDecoder::new(reader)),
        ContentEncoding::Gzip => Box::new(GzipDecoder::new(reader)),
        ContentEncoding::Zstd => Box::new(ZstdDecoder::new(reader)),
    };

    let mut out = Vec::with_capacity(32 * 1024);
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if out.len() + n > max_bytes {
            return Err(BodyError::TooLarge { limit: max_bytes });
        }
        out.extend_from_slice(&chunk[..n]);
    }

    Ok(Bytes::from(out))
}
