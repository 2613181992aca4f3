//! Call categories and outcome classification

use crate::error::{RetryClass, UploadError};

/// Independently paced class of outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Listing,
    UploadInit,
    DownloadLink,
    /// Deletes and other control-plane mutations
    Mutation,
    /// Object-store data transfer (different origin, usually unthrottled)
    BulkTransfer,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Listing,
        Category::UploadInit,
        Category::DownloadLink,
        Category::Mutation,
        Category::BulkTransfer,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Listing => 0,
            Self::UploadInit => 1,
            Self::DownloadLink => 2,
            Self::Mutation => 3,
            Self::BulkTransfer => 4,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listing => write!(f, "listing"),
            Self::UploadInit => write!(f, "upload-init"),
            Self::DownloadLink => write!(f, "download-link"),
            Self::Mutation => write!(f, "mutation"),
            Self::BulkTransfer => write!(f, "bulk-transfer"),
        }
    }
}

/// Outcome of a single paced call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Rate-limit response from the remote
    Throttled,
    /// 5xx, timeout or connection failure
    Transient,
    /// Rejected for a reason pacing cannot help with (auth, protocol, ...)
    Rejected,
}

impl Outcome {
    /// Classify a call result; cancellation says nothing about remote pressure
    pub fn from_result<T>(result: &Result<T, UploadError>) -> Option<Self> {
        match result {
            Ok(_) => Some(Self::Success),
            Err(err) => match err.retry_class() {
                RetryClass::Cancelled => None,
                RetryClass::Throttled => Some(Self::Throttled),
                RetryClass::Transient => Some(Self::Transient),
                RetryClass::Authorization | RetryClass::Fatal => Some(Self::Rejected),
            },
        }
    }

    /// Whether the outcome signals backpressure and should widen the spacing
    pub fn is_backpressure(self) -> bool {
        matches!(self, Self::Throttled | Self::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_indices_are_distinct() {
        let mut seen: Vec<usize> = Category::ALL.iter().map(|c| c.index()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), Category::ALL.len());
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(
            Outcome::from_result::<()>(&Ok(())),
            Some(Outcome::Success)
        );
        assert_eq!(
            Outcome::from_result::<()>(&Err(UploadError::Throttled {
                message: "429".into(),
                retry_after: None
            })),
            Some(Outcome::Throttled)
        );
        assert_eq!(
            Outcome::from_result::<()>(&Err(UploadError::Transient("timeout".into()))),
            Some(Outcome::Transient)
        );
        assert_eq!(
            Outcome::from_result::<()>(&Err(UploadError::Authorization("401".into()))),
            Some(Outcome::Rejected)
        );
        assert_eq!(Outcome::from_result::<()>(&Err(UploadError::Cancelled)), None);
    }

    #[test]
    fn test_backpressure() {
        assert!(Outcome::Throttled.is_backpressure());
        assert!(Outcome::Transient.is_backpressure());
        assert!(!Outcome::Success.is_backpressure());
        assert!(!Outcome::Rejected.is_backpressure());
    }
}
