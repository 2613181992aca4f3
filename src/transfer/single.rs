//! Single-shot transfer for small payloads

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::error::UploadError;
use crate::hash::ReplayableSource;
use crate::transport::Transport;
use crate::types::{ObjectTarget, TransferOptions};

/// Callback body and byte count of a single-shot transfer
#[derive(Debug)]
pub struct DirectTransfer {
    pub callback_body: Bytes,
    pub bytes_sent: u64,
}

/// Read the whole payload, check it against `size`, and put it in one request
pub async fn transfer_direct(
    transport: &Transport<'_>,
    source: &ReplayableSource,
    target: &ObjectTarget,
    size: u64,
    options: &TransferOptions,
) -> Result<DirectTransfer, UploadError> {
    let mut data = Vec::with_capacity(size as usize);
    source
        .open()
        .await?
        .take(size.saturating_add(1))
        .read_to_end(&mut data)
        .await?;

    let read = data.len() as u64;
    if read != size {
        return Err(UploadError::Integrity(if read > size {
            format!("source produced more than the declared {} bytes", size)
        } else {
            format!("declared size {} but source produced {} bytes", size, read)
        }));
    }

    // Each retry resends the same buffer
    let data = Bytes::from(data);
    let store = transport.store;
    let callback_body = transport
        .store_call(|_| store.put_object(target, data.clone(), options))
        .await?;

    info!("Uploaded {} bytes to {} in one request", size, target.object_key);
    Ok(DirectTransfer {
        callback_body,
        bytes_sent: size,
    })
}
