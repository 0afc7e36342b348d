use serde::{Deserialize, Serialize};

use crate::{Compensation, TransType, TransactionStatus};

/// Opaque description of a confirm or cancel call.
///
/// The coordinator never interprets these fields; they are handed to the
/// invocation executor as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invocation {
    /// Service or component the call is addressed to
    pub target: String,

    /// Method name on the target
    pub method: String,

    /// Call arguments
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl Invocation {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// One compensable action enlisted under a transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub participant_id: String,
    pub trans_id: String,
    pub trans_type: TransType,
    pub status: TransactionStatus,
    pub retry: u32,
    pub confirm: Option<Invocation>,
    pub cancel: Option<Invocation>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Participant {
    pub fn new(
        participant_id: impl Into<String>,
        trans_id: impl Into<String>,
        trans_type: TransType,
        created_at: u64,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            trans_id: trans_id.into(),
            trans_type,
            status: TransactionStatus::Begin,
            retry: 0,
            confirm: None,
            cancel: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_confirm(mut self, invocation: Invocation) -> Self {
        self.confirm = Some(invocation);
        self
    }

    pub fn with_cancel(mut self, invocation: Invocation) -> Self {
        self.cancel = Some(invocation);
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Descriptor for the given compensation, if the participant has one
    pub fn invocation(&self, compensation: Compensation) -> Option<&Invocation> {
        match compensation {
            Compensation::Confirm => self.confirm.as_ref(),
            Compensation::Cancel => self.cancel.as_ref(),
        }
    }

    /// Names of the descriptors this participant's transaction type needs but lacks
    pub fn missing_descriptors(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.trans_type.requires_confirm() && self.confirm.is_none() {
            missing.push("confirm");
        }
        if self.cancel.is_none() {
            missing.push("cancel");
        }
        missing
    }
}
