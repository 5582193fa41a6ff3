//! Source access - resolves a location into a lazy, demand-driven batch stream
//!
//! Remote bodies are pulled chunk by chunk from the HTTP response into a bounded
//! channel; a blocking reader thread decodes and parses them as they arrive, so the
//! first batch is ready long before the download ends. Gzip is detected from the
//! magic bytes so plain CSV files also work.

use crate::error::{LoadError, Result};
use crate::ingestion::batch::RowBatch;
use crate::ingestion::csv_reader::BatchReader;
use crate::ingestion::schema::SchemaDescriptor;
use async_trait::async_trait;
use flate2::bufread::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Response chunks buffered between the download task and the reader thread
const CHUNK_BUFFER: usize = 16;

/// A sequence of batches the loader pulls one at a time
#[async_trait]
pub trait BatchSource: Send {
    /// Next batch, or `None` once the source is exhausted or has failed
    async fn next_batch(&mut self) -> Option<Result<RowBatch>>;
}

#[async_trait]
impl<I> BatchSource for I
where
    I: Iterator<Item = Result<RowBatch>> + Send,
{
    async fn next_batch(&mut self) -> Option<Result<RowBatch>> {
        self.next()
    }
}

/// Where the trip file lives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLocation {
    Url(String),
    Path(PathBuf),
}

impl SourceLocation {
    /// Anything starting with `http://` or `https://` is a URL, the rest a local path
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceLocation::Url(location.to_string())
        } else {
            SourceLocation::Path(PathBuf::from(location))
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Url(url) => write!(f, "{}", url),
            SourceLocation::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Batches parsed on a blocking thread, one per request.
///
/// The reader thread only parses the next batch when asked for it, so at most one
/// batch is alive at a time. Dropping this handle stops the thread.
pub struct SourceBatches {
    requests: mpsc::Sender<()>,
    batches: mpsc::Receiver<Result<RowBatch>>,
}

#[async_trait]
impl BatchSource for SourceBatches {
    async fn next_batch(&mut self) -> Option<Result<RowBatch>> {
        self.requests.send(()).await.ok()?;
        self.batches.recv().await
    }
}

/// Open `location` and return a lazy sequence of batches of at most `batch_size` rows.
///
/// Fails before returning if the location cannot be reached, the stream cannot be
/// decoded, or the header lacks a declared column.
pub async fn open_source(
    location: &SourceLocation,
    schema: Arc<SchemaDescriptor>,
    batch_size: usize,
) -> Result<SourceBatches> {
    if batch_size == 0 {
        return Err(LoadError::InvalidConfig(
            "batch size must be a positive integer".to_string(),
        ));
    }

    let raw: Box<dyn Read + Send> = match location {
        SourceLocation::Url(url) => Box::new(download(url).await?),
        SourceLocation::Path(path) => Box::new(File::open(path).map_err(|e| {
            LoadError::SourceUnavailable(format!("Failed to open {}: {}", path.display(), e))
        })?),
    };

    spawn_batch_reader(raw, schema, batch_size).await
}

/// Start the download and hand back a reader over the body as it arrives
async fn download(url: &str) -> Result<ChunkReader> {
    info!("Downloading {}", url);

    let mut response = reqwest::get(url).await?.error_for_status()?;
    let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
    let url = url.to_string();

    tokio::spawn(async move {
        let mut downloaded: u64 = 0;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(io::Error::other(e))).await;
                    return;
                }
            };
            downloaded += chunk.len() as u64;
            if tx.send(Ok(chunk.to_vec())).await.is_err() {
                debug!("Reader went away after {} bytes of {}", downloaded, url);
                return;
            }
        }
        info!("Downloaded {} bytes from {}", downloaded, url);
    });

    Ok(ChunkReader::new(rx))
}

/// Blocking `Read` over byte chunks delivered through a channel.
///
/// Only usable off the async runtime; the reader thread owns it.
struct ChunkReader {
    chunks: mpsc::Receiver<io::Result<Vec<u8>>>,
    current: Vec<u8>,
    offset: usize,
}

impl ChunkReader {
    fn new(chunks: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            chunks,
            current: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset == self.current.len() {
            match self.chunks.blocking_recv() {
                Some(chunk) => {
                    self.current = chunk?;
                    self.offset = 0;
                }
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len() - self.offset);
        buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

/// Decode and parse `raw` on a blocking thread, serving batches on request
async fn spawn_batch_reader(
    raw: Box<dyn Read + Send>,
    schema: Arc<SchemaDescriptor>,
    batch_size: usize,
) -> Result<SourceBatches> {
    let (opened_tx, opened_rx) = oneshot::channel();
    let (request_tx, mut request_rx) = mpsc::channel::<()>(1);
    let (batch_tx, batch_rx) = mpsc::channel(1);

    tokio::task::spawn_blocking(move || {
        let mut reader = match decode(raw).and_then(|r| BatchReader::new(r, schema, batch_size)) {
            Ok(reader) => {
                if opened_tx.send(Ok(())).is_err() {
                    return;
                }
                reader
            }
            Err(e) => {
                let _ = opened_tx.send(Err(e));
                return;
            }
        };

        while request_rx.blocking_recv().is_some() {
            let next = reader.next();
            let done = !matches!(next, Some(Ok(_)));
            let Some(item) = next else {
                break;
            };
            if batch_tx.blocking_send(item).is_err() || done {
                break;
            }
        }
        debug!("Reader thread finished after {} rows", reader.rows_read());
    });

    match opened_rx.await {
        Ok(Ok(())) => Ok(SourceBatches {
            requests: request_tx,
            batches: batch_rx,
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!("Source reader thread stopped before reading the header");
            Err(LoadError::SourceUnavailable(
                "source reader stopped unexpectedly".to_string(),
            ))
        }
    }
}

/// Wrap the stream in a gzip decoder if it starts with the gzip magic bytes
fn decode<R: Read + Send + 'static>(mut inner: R) -> Result<Box<dyn Read + Send>> {
    // chunks may be shorter than the magic, so keep reading until both bytes are in
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        match inner.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(LoadError::SourceUnavailable(format!(
                    "Failed to read source: {}",
                    e
                )))
            }
        }
    }

    let is_gzip = magic[..filled] == GZIP_MAGIC;
    let buffered = BufReader::new(io::Cursor::new(magic[..filled].to_vec()).chain(inner));

    if is_gzip {
        debug!("Source is gzip compressed");
        Ok(Box::new(MultiGzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}
