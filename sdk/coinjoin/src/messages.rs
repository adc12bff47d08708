//! Coordination Messages
//!
//! JSON objects tagged by `"type"`:
//!
//! ```text
//! {"type":"JOINED","sessionId":"s1","participantId":"p7","rsaModulus":"c3..","rsaExponent":"010001","denomination":1000000000}
//! {"type":"SUBMIT_BLINDED","sessionId":"s1","blindedCommitment":"8f.."}
//! ```
//!
//! Byte fields are hex. Every inbound frame is decoded and checked here
//! before the session state machine sees it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shroud_privacy::ErrorClass;

/// Largest frame accepted from the coordinator.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
/// 8192-bit modulus.
pub const MAX_MODULUS_LEN: usize = 1024;
pub const MAX_ID_LEN: usize = 128;
pub const MAX_TRANSACTION_LEN: usize = 16 * 1024;

/// Coordinator error code asking the client to back off and retry.
pub const RATE_LIMITED: &str = "RATE_LIMITED";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

impl ProtocolError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Protocol
    }
}

/// Messages received from the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Inbound {
    Joined {
        session_id: String,
        participant_id: String,
        #[serde(with = "hex")]
        rsa_modulus: Vec<u8>,
        #[serde(with = "hex")]
        rsa_exponent: Vec<u8>,
        denomination: u64,
    },
    ParticipantCount {
        count: u32,
        required: u32,
    },
    SessionStarting {
        session_id: String,
    },
    RequestBlindedCommitment,
    BlindSignature {
        #[serde(with = "hex")]
        signature: Vec<u8>,
    },
    RequestUnblindedCommitment,
    CommitmentsCollected {
        count: u32,
    },
    RequestInputAddress,
    TransactionReady {
        #[serde(with = "hex")]
        transaction: Vec<u8>,
    },
    TransactionComplete {
        signature: String,
    },
    SessionAborted {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Joined { .. } => "JOINED",
            Inbound::ParticipantCount { .. } => "PARTICIPANT_COUNT",
            Inbound::SessionStarting { .. } => "SESSION_STARTING",
            Inbound::RequestBlindedCommitment => "REQUEST_BLINDED_COMMITMENT",
            Inbound::BlindSignature { .. } => "BLIND_SIGNATURE",
            Inbound::RequestUnblindedCommitment => "REQUEST_UNBLINDED_COMMITMENT",
            Inbound::CommitmentsCollected { .. } => "COMMITMENTS_COLLECTED",
            Inbound::RequestInputAddress => "REQUEST_INPUT_ADDRESS",
            Inbound::TransactionReady { .. } => "TRANSACTION_READY",
            Inbound::TransactionComplete { .. } => "TRANSACTION_COMPLETE",
            Inbound::SessionAborted { .. } => "SESSION_ABORTED",
            Inbound::Error { .. } => "ERROR",
        }
    }

    /// Field-level checks serde cannot express.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Inbound::Joined {
                session_id,
                participant_id,
                rsa_modulus,
                rsa_exponent,
                denomination,
            } => {
                check_id("sessionId", session_id)?;
                check_id("participantId", participant_id)?;
                check_bytes("rsaModulus", rsa_modulus, MAX_MODULUS_LEN)?;
                check_bytes("rsaExponent", rsa_exponent, rsa_modulus.len())?;
                if *denomination == 0 {
                    return Err(ProtocolError::InvalidField {
                        field: "denomination",
                        reason: "must be positive",
                    });
                }
            }
            Inbound::ParticipantCount { required, .. } => {
                if *required == 0 {
                    return Err(ProtocolError::InvalidField {
                        field: "required",
                        reason: "must be positive",
                    });
                }
            }
            Inbound::SessionStarting { session_id } => check_id("sessionId", session_id)?,
            Inbound::BlindSignature { signature } => {
                check_bytes("signature", signature, MAX_MODULUS_LEN)?
            }
            Inbound::TransactionReady { transaction } => {
                check_bytes("transaction", transaction, MAX_TRANSACTION_LEN)?
            }
            Inbound::TransactionComplete { signature } => check_id("signature", signature)?,
            Inbound::Error { code, .. } => check_id("code", code)?,
            Inbound::RequestBlindedCommitment
            | Inbound::RequestUnblindedCommitment
            | Inbound::CommitmentsCollected { .. }
            | Inbound::RequestInputAddress
            | Inbound::SessionAborted { .. } => {}
        }
        Ok(())
    }
}

/// Messages sent to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Outbound {
    Join {
        denomination: u64,
    },
    Ready {
        session_id: String,
    },
    SubmitBlinded {
        session_id: String,
        #[serde(with = "hex")]
        blinded_commitment: Vec<u8>,
    },
    SubmitUnblinded {
        session_id: String,
        #[serde(with = "hex")]
        commitment: [u8; 32],
        #[serde(with = "hex")]
        signature: Vec<u8>,
    },
    SubmitInput {
        session_id: String,
        input_address: String,
    },
    SubmitSignature {
        session_id: String,
        #[serde(with = "hex")]
        signature: Vec<u8>,
    },
    Abort {
        session_id: Option<String>,
        reason: String,
    },
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Join { .. } => "JOIN",
            Outbound::Ready { .. } => "READY",
            Outbound::SubmitBlinded { .. } => "SUBMIT_BLINDED",
            Outbound::SubmitUnblinded { .. } => "SUBMIT_UNBLINDED",
            Outbound::SubmitInput { .. } => "SUBMIT_INPUT",
            Outbound::SubmitSignature { .. } => "SUBMIT_SIGNATURE",
            Outbound::Abort { .. } => "ABORT",
        }
    }
}

/// Parse and validate one inbound frame.
pub fn decode_inbound(frame: &str) -> Result<Inbound, ProtocolError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }
    let msg: Inbound =
        serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    msg.validate()?;
    Ok(msg)
}

pub fn encode_outbound(msg: &Outbound) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Coordinator side of the codec, used by in-process coordinators and tests.
pub fn encode_inbound(msg: &Inbound) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn decode_outbound(frame: &str) -> Result<Outbound, ProtocolError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }
    serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn check_id(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidField {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > MAX_ID_LEN {
        return Err(ProtocolError::InvalidField {
            field,
            reason: "too long",
        });
    }
    Ok(())
}

fn check_bytes(field: &'static str, value: &[u8], max: usize) -> Result<(), ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidField {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > max {
        return Err(ProtocolError::InvalidField {
            field,
            reason: "too long",
        });
    }
    Ok(())
}
