//! Byte sources and the replayable wrapper the engine reads them through

use std::io::{self, Cursor, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::error::UploadError;

/// Boxed forward-only reader
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Something that can produce the same bytes again from the start
#[async_trait]
pub trait SourceProducer: Send + Sync {
    async fn open(&self) -> io::Result<BoxReader>;
}

/// Byte source handed to the engine by the caller
pub enum UploadSource {
    /// In-memory payload
    Bytes(Bytes),
    /// Local file, re-opened and seeked as needed
    File(PathBuf),
    /// Forward-only stream; readable exactly once
    Stream(BoxReader),
    /// Original producer that can be asked for the bytes again
    Producer(Arc<dyn SourceProducer>),
}

impl UploadSource {
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// Whether the source can be read again from the start without buffering
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::Stream(_))
    }
}

impl std::fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::File(p) => write!(f, "File({})", p.display()),
            Self::Stream(_) => write!(f, "Stream"),
            Self::Producer(_) => write!(f, "Producer"),
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

enum Backing {
    Memory(Bytes),
    File(PathBuf),
    /// Deleted when the source is dropped
    Spooled(NamedTempFile),
    Producer(Arc<dyn SourceProducer>),
    Once(Mutex<Option<BoxReader>>),
}

/// Source wrapper chosen once per upload: memory buffer, file, spooled
/// temporary file, re-openable producer, or a single-use stream
pub struct ReplayableSource {
    backing: Backing,
}

impl std::fmt::Debug for ReplayableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.backing {
            Backing::Memory(b) => format!("Memory({} bytes)", b.len()),
            Backing::File(p) => format!("File({})", p.display()),
            Backing::Spooled(t) => format!("Spooled({})", t.path().display()),
            Backing::Producer(_) => "Producer".to_string(),
            Backing::Once(_) => "Once".to_string(),
        };
        write!(f, "ReplayableSource::{}", kind)
    }
}

impl ReplayableSource {
    /// Wrap `source`, buffering a forward-only stream when `needs_replay` is set.
    ///
    /// Streams whose size is known and within `memory_threshold` are held in
    /// memory; anything larger (or of unknown size past the threshold) is
    /// spooled to a temporary file.
    pub async fn prepare(
        source: UploadSource,
        size: Option<u64>,
        memory_threshold: u64,
        needs_replay: bool,
    ) -> Result<Self, UploadError> {
        let backing = match source {
            UploadSource::Bytes(bytes) => Backing::Memory(bytes),
            UploadSource::File(path) => Backing::File(path),
            UploadSource::Producer(producer) => Backing::Producer(producer),
            UploadSource::Stream(reader) if !needs_replay => {
                Backing::Once(Mutex::new(Some(reader)))
            }
            UploadSource::Stream(reader) => buffer_stream(reader, size, memory_threshold).await?,
        };
        Ok(Self { backing })
    }

    pub fn is_replayable(&self) -> bool {
        !matches!(self.backing, Backing::Once(_))
    }

    /// Whether the stream was spooled to a temporary file
    pub fn is_spooled(&self) -> bool {
        matches!(self.backing, Backing::Spooled(_))
    }

    /// Open a reader positioned at the first byte
    pub async fn open(&self) -> Result<BoxReader, UploadError> {
        match &self.backing {
            Backing::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Backing::File(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
            Backing::Spooled(tmp) => Ok(Box::new(tokio::fs::File::open(tmp.path()).await?)),
            Backing::Producer(producer) => Ok(producer.open().await?),
            Backing::Once(slot) => slot
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .ok_or_else(|| {
                    UploadError::InvalidRequest("stream source was already consumed".to_string())
                }),
        }
    }

    /// Open a reader positioned at byte `start`.
    ///
    /// Memory is sliced, files are seeked, producers are re-opened and
    /// skipped forward. A source shorter than `start` fails with `Integrity`.
    pub async fn open_at(&self, start: u64) -> Result<BoxReader, UploadError> {
        match &self.backing {
            Backing::Memory(bytes) => {
                if start > bytes.len() as u64 {
                    return Err(short_read(start, 0));
                }
                Ok(Box::new(Cursor::new(bytes.slice(start as usize..))))
            }
            Backing::File(path) => open_file_at(path, start).await,
            Backing::Spooled(tmp) => open_file_at(tmp.path(), start).await,
            Backing::Producer(producer) => {
                let mut reader = producer.open().await?;
                let skipped = tokio::io::copy(&mut (&mut reader).take(start), &mut tokio::io::sink())
                    .await?;
                if skipped != start {
                    return Err(short_read(start, 0));
                }
                Ok(reader)
            }
            Backing::Once(_) => Err(UploadError::InvalidRequest(
                "byte ranges cannot be read from a single-use stream".to_string(),
            )),
        }
    }

    /// Read exactly `len` bytes starting at `start` into memory
    pub async fn read_range(&self, start: u64, len: u64) -> Result<Bytes, UploadError> {
        if let Backing::Memory(bytes) = &self.backing {
            let end = start.checked_add(len).filter(|end| *end <= bytes.len() as u64);
            return match end {
                Some(end) => Ok(bytes.slice(start as usize..end as usize)),
                None => Err(short_read(start, len)),
            };
        }
        let mut reader = self.open_at(start).await?;
        read_exact_bytes(&mut reader, start, len).await
    }
}

async fn buffer_stream(
    mut reader: BoxReader,
    size: Option<u64>,
    memory_threshold: u64,
) -> Result<Backing, UploadError> {
    if let Some(size) = size {
        if size <= memory_threshold {
            let mut data = Vec::with_capacity(size as usize);
            reader.read_to_end(&mut data).await?;
            debug!("Buffered {} byte stream in memory", data.len());
            return Ok(Backing::Memory(Bytes::from(data)));
        }
        return spool(Vec::new(), reader).await;
    }

    // Unknown size: stay in memory until the threshold is crossed
    let mut head = Vec::new();
    (&mut reader)
        .take(memory_threshold.saturating_add(1))
        .read_to_end(&mut head)
        .await?;
    if head.len() as u64 <= memory_threshold {
        debug!("Buffered {} byte stream in memory", head.len());
        return Ok(Backing::Memory(Bytes::from(head)));
    }
    spool(head, reader).await
}

async fn spool(head: Vec<u8>, mut rest: BoxReader) -> Result<Backing, UploadError> {
    let tmp = NamedTempFile::new()?;
    let mut out = tokio::fs::OpenOptions::new()
        .write(true)
        .open(tmp.path())
        .await?;
    out.write_all(&head).await?;
    let copied = tokio::io::copy(&mut rest, &mut out).await?;
    out.flush().await?;
    debug!(
        "Spooled {} byte stream to {}",
        head.len() as u64 + copied,
        tmp.path().display()
    );
    Ok(Backing::Spooled(tmp))
}

async fn open_file_at(path: &std::path::Path, start: u64) -> Result<BoxReader, UploadError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    Ok(Box::new(file))
}

async fn read_exact_bytes<R>(reader: &mut R, start: u64, len: u64) -> Result<Bytes, UploadError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; len as usize];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(Bytes::from(buf)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(short_read(start, len)),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn short_read(start: u64, len: u64) -> UploadError {
    UploadError::Integrity(format!(
        "source ended before byte range {}-{}",
        start,
        (start + len).saturating_sub(1)
    ))
}
