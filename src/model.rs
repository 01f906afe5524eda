use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type SignerId = u64;
pub type SignatureId = u64;
pub type CertificateId = u64;
pub type ParticipantId = u64;
pub type UserId = u64;

/// Someone invited by a certificate owner to approve documents.
/// The email is only unique per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signer {
    pub id: SignerId,
    pub email: String,
    pub name: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// One approval slot for a (certificate, signer) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub id: SignatureId,
    pub signer_id: SignerId,
    pub certificate_id: CertificateId,
    pub created_by: UserId,
    /// Encrypted image, empty until captured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypted_image: Vec<u8>,
    pub is_signed: bool,
    pub is_requested: bool,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a signature slot. `Signed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignatureState {
    Unrequested,
    Requested,
    Signed,
}

impl Signature {
    pub fn state(&self) -> SignatureState {
        if self.is_signed {
            SignatureState::Signed
        } else if self.is_requested {
            SignatureState::Requested
        } else {
            SignatureState::Unrequested
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: CertificateId,
    pub owner_id: UserId,
    pub name: String,
    /// Serialized design tree, see [`crate::design::Design`].
    pub design: String,
    #[serde(default)]
    pub is_distributed: bool,
    #[serde(default)]
    pub is_signed: bool,
    #[serde(default)]
    pub archive_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmailStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

/// A recipient of a rendered certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub certificate_id: CertificateId,
    /// Named fields used for placeholder substitution. May hold a nested
    /// `data` object with more fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub certificate_url: Option<String>,
    #[serde(default)]
    pub email_status: EmailStatus,
    #[serde(default)]
    pub is_downloaded: bool,
}

impl Participant {
    pub fn new(
        id: ParticipantId,
        certificate_id: CertificateId,
        fields: Map<String, Value>,
    ) -> Self {
        Participant {
            id,
            certificate_id,
            fields,
            certificate_url: None,
            email_status: EmailStatus::Pending,
            is_downloaded: false,
        }
    }

    /// Look a field up at the top level, then inside the nested `data` map.
    pub fn field(&self, name: &str) -> Option<String> {
        lookup_field(&self.fields, name)
    }
}

pub(crate) fn lookup_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(value_as_text)
        .or_else(|| {
            fields
                .get("data")
                .and_then(Value::as_object)
                .and_then(|data| data.get(name))
                .and_then(value_as_text)
        })
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderStatus {
    Success,
    Error,
}

/// Outcome of rendering one participant. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub participant_id: ParticipantId,
    pub output: Option<Vec<u8>>,
    pub status: RenderStatus,
    pub error: Option<String>,
    /// Whether the PDF carries a PKI signature.
    pub signed: bool,
}

impl RenderResult {
    pub fn success(participant_id: ParticipantId, output: Vec<u8>, signed: bool) -> Self {
        RenderResult {
            participant_id,
            output: Some(output),
            status: RenderStatus::Success,
            error: None,
            signed,
        }
    }

    pub fn failure(participant_id: ParticipantId, error: String) -> Self {
        RenderResult {
            participant_id,
            output: None,
            status: RenderStatus::Error,
            error: Some(error),
            signed: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RenderStatus::Success
    }
}
