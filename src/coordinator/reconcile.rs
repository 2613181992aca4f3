//! Turning completion callbacks into upload results

use tracing::{info, warn};

use crate::error::UploadError;
use crate::hash::Sha1Digest;
use crate::pacer::Category;
use crate::remote::wire;
use crate::transport::Transport;
use crate::types::{Placeholder, Strategy, UploadResult};

/// Result of an instant upload; no bytes were sent
pub fn instant_result(
    placeholder: &Placeholder,
    file_id: String,
    pick_code: String,
    size: u64,
    full_hash: &Sha1Digest,
) -> UploadResult {
    UploadResult {
        file_id,
        parent_id: placeholder.parent_id.clone(),
        name: placeholder.leaf_name.clone(),
        size,
        sha1: full_hash.to_lower_hex(),
        pick_code,
        strategy: Strategy::Dedup,
        bytes_transferred: 0,
    }
}

/// Parse a transfer's callback body and check it against what was sent
pub fn transfer_result(
    callback_body: &[u8],
    placeholder: &Placeholder,
    declared_size: Option<u64>,
    bytes_sent: u64,
    full_hash: Option<&Sha1Digest>,
    strategy: Strategy,
) -> Result<UploadResult, UploadError> {
    let callback = wire::decode_callback_result(callback_body)?;

    if callback.file_size != bytes_sent {
        return Err(UploadError::Integrity(format!(
            "remote confirmed {} bytes but {} were sent",
            callback.file_size, bytes_sent
        )));
    }
    if let Some(declared) = declared_size {
        if declared != callback.file_size {
            return Err(UploadError::Integrity(format!(
                "remote confirmed {} bytes but {} were declared",
                callback.file_size, declared
            )));
        }
    }
    if let (Some(remote), Some(local)) = (callback.sha1.as_deref(), full_hash) {
        if !local.matches_hex(remote) {
            return Err(UploadError::Integrity(format!(
                "remote hash {} does not match local hash {}",
                remote, local
            )));
        }
    }

    let sha1 = callback
        .sha1
        .map(|s| s.to_ascii_lowercase())
        .or_else(|| full_hash.map(Sha1Digest::to_lower_hex))
        .unwrap_or_default();

    Ok(UploadResult {
        file_id: callback.file_id,
        parent_id: placeholder.parent_id.clone(),
        name: callback
            .file_name
            .unwrap_or_else(|| placeholder.leaf_name.clone()),
        size: callback.file_size,
        sha1,
        pick_code: callback.pick_code,
        strategy,
        bytes_transferred: bytes_sent,
    })
}

/// Delete the object this upload replaced if the remote created a new one.
///
/// Failures are logged, never returned.
pub async fn remove_stale(transport: &Transport<'_>, replaced: Option<&str>, new_id: &str) {
    let stale = match replaced {
        Some(id) if id != new_id => id,
        _ => return,
    };

    let control = transport.control;
    let result = transport
        .authorized(Category::Mutation, |token| async move {
            control.delete_object(&token, stale).await
        })
        .await;

    match result {
        Ok(()) => info!("Removed stale object {} replaced by {}", stale, new_id),
        Err(e) => warn!(
            "Failed to remove stale object {} replaced by {}: {}",
            stale, new_id, e
        ),
    }
}
