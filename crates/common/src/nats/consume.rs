use bytes::Bytes;

/// A single consumed message, owned so it can travel through a Tower stack
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    pub payload: Bytes,
}

impl ConsumeRequest {
    pub fn new(subject: impl Into<String>, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }

    /// Last `.`-separated token of the subject
    pub fn subject_tail(&self) -> &str {
        self.subject.rsplit('.').next().unwrap_or_default()
    }
}

/// Whether the consumed message should be acknowledged or redelivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    Ack,
    Nak(String),
}

impl ConsumeResponse {
    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(reason.into())
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }
}
