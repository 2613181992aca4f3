//! Instant-upload negotiation: hash proof, optional range challenges

use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::hash::{ByteRange, HashDigestCalculator, HashDigestSet};
use crate::pacer::Category;
use crate::remote::{InitReply, InitUploadRequest};
use crate::transport::Transport;
use crate::types::{ObjectTarget, Placeholder};

/// Terminal result of a negotiation
#[derive(Debug)]
pub enum DedupOutcome {
    /// Content already held remotely; nothing to transfer
    InstantSuccess { file_id: String, pick_code: String },
    /// No remote record; bytes go to `target`
    NeedUpload { target: ObjectTarget },
    /// Remote rejection, transport failure or too many challenges
    Failed { error: UploadError },
}

/// Outcome plus the digests computed along the way
#[derive(Debug)]
pub struct DedupNegotiation {
    pub outcome: DedupOutcome,
    pub digests: HashDigestSet,
    /// Challenge rounds answered
    pub rounds: u32,
}

/// Next step after one initiation reply
#[derive(Debug)]
pub enum Transition {
    Instant { file_id: String, pick_code: String },
    Upload(ObjectTarget),
    Challenge { sign_key: String, range: ByteRange },
    Fail(UploadError),
}

/// Transition function of the negotiation.
///
/// `rounds` is the number of challenges already answered; a challenge
/// arriving once `max_rounds` have been answered fails the negotiation.
pub fn advance(rounds: u32, max_rounds: u32, reply: InitReply) -> Transition {
    match reply {
        InitReply::Instant { file_id, pick_code } => Transition::Instant { file_id, pick_code },
        InitReply::NeedUpload(target) => Transition::Upload(target),
        InitReply::SignCheck { sign_key, range } if rounds < max_rounds => {
            Transition::Challenge { sign_key, range }
        }
        InitReply::SignCheck { range, .. } => Transition::Fail(UploadError::ProtocolViolation(
            format!(
                "secondary auth still required after {} rounds (last range {})",
                rounds, range
            ),
        )),
        InitReply::Rejected { status, message } => Transition::Fail(
            UploadError::ProtocolViolation(format!(
                "upload initiation returned status {}: {}",
                status, message
            )),
        ),
    }
}

/// Drives the instant-upload exchange for one payload
pub struct HashDedupNegotiator<'a> {
    transport: &'a Transport<'a>,
    max_rounds: u32,
}

impl<'a> HashDedupNegotiator<'a> {
    pub fn new(transport: &'a Transport<'a>, max_rounds: u32) -> Self {
        Self {
            transport,
            max_rounds,
        }
    }

    /// Hash the payload and negotiate until a terminal state.
    ///
    /// Remote failures end in `DedupOutcome::Failed`. Cancellation and local
    /// read errors are returned as `Err`.
    pub async fn negotiate(
        &self,
        calculator: &mut HashDigestCalculator<'_>,
        placeholder: &Placeholder,
    ) -> Result<DedupNegotiation, UploadError> {
        let digests = calculator.digest_set().await?;
        let mut request = InitUploadRequest {
            file_name: placeholder.leaf_name.clone(),
            file_size: calculator.size(),
            parent_id: placeholder.parent_id.clone(),
            file_hash: digests.full.to_upper_hex(),
            prefix_hash: digests.prefix.to_upper_hex(),
            sign_key: None,
            sign_val: None,
        };
        let mut rounds = 0;
        let finish = |outcome, rounds| DedupNegotiation {
            outcome,
            digests,
            rounds,
        };

        loop {
            let control = self.transport.control;
            let pending = &request;
            let reply = self
                .transport
                .authorized(Category::UploadInit, |token| async move {
                    control.init_upload(&token, pending).await
                })
                .await;

            let reply = match reply {
                Ok(reply) => reply,
                Err(error) if error.is_cancelled() => return Err(error),
                Err(error) => {
                    warn!("Upload initiation for {} failed: {}", request.file_name, error);
                    return Ok(finish(DedupOutcome::Failed { error }, rounds));
                }
            };

            match advance(rounds, self.max_rounds, reply) {
                Transition::Instant { file_id, pick_code } => {
                    info!(
                        "Instant upload of {} succeeded (file id {})",
                        request.file_name, file_id
                    );
                    return Ok(finish(
                        DedupOutcome::InstantSuccess { file_id, pick_code },
                        rounds,
                    ));
                }
                Transition::Upload(target) => {
                    debug!("No remote copy of {}, transfer required", request.file_name);
                    return Ok(finish(DedupOutcome::NeedUpload { target }, rounds));
                }
                Transition::Fail(error) => {
                    warn!("Instant upload of {} failed: {}", request.file_name, error);
                    return Ok(finish(DedupOutcome::Failed { error }, rounds));
                }
                Transition::Challenge { sign_key, range } => {
                    rounds += 1;
                    info!(
                        "Secondary auth round {} for {}: range {}",
                        rounds, request.file_name, range
                    );
                    let proof = match calculator.range_hash(range).await {
                        Ok(proof) => proof,
                        Err(error @ UploadError::ProtocolViolation(_)) => {
                            return Ok(finish(DedupOutcome::Failed { error }, rounds));
                        }
                        Err(error) => return Err(error),
                    };
                    request.sign_key = Some(sign_key);
                    request.sign_val = Some(proof.to_upper_hex());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallbackSpec;

    fn target() -> ObjectTarget {
        ObjectTarget {
            bucket: "b".into(),
            object_key: "k".into(),
            callback: CallbackSpec {
                callback: "cb".into(),
                callback_var: String::new(),
            },
        }
    }

    fn challenge() -> InitReply {
        InitReply::SignCheck {
            sign_key: "key".into(),
            range: ByteRange::new(0, 131071).unwrap(),
        }
    }

    #[test]
    fn test_terminal_replies() {
        assert!(matches!(
            advance(
                0,
                3,
                InitReply::Instant {
                    file_id: "f".into(),
                    pick_code: "p".into()
                }
            ),
            Transition::Instant { .. }
        ));
        assert!(matches!(
            advance(0, 3, InitReply::NeedUpload(target())),
            Transition::Upload(_)
        ));
    }

    #[test]
    fn test_challenge_rounds_are_bounded() {
        assert!(matches!(advance(0, 3, challenge()), Transition::Challenge { .. }));
        assert!(matches!(advance(2, 3, challenge()), Transition::Challenge { .. }));
        assert!(matches!(
            advance(3, 3, challenge()),
            Transition::Fail(UploadError::ProtocolViolation(_))
        ));
        assert!(matches!(advance(0, 0, challenge()), Transition::Fail(_)));
    }

    #[test]
    fn test_other_statuses_fail() {
        for status in [6, 8] {
            let reply = InitReply::Rejected {
                status,
                message: String::new(),
            };
            assert!(matches!(advance(0, 3, reply), Transition::Fail(_)));
        }
    }
}
