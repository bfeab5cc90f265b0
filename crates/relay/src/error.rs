use serde_json::Value;
use socialnet_common::protocol::ws::{ErrorFrame, ErrorType, CLOSE_AUTH_FAILED, CLOSE_DENIED};

/// An error surfaced to a connected client as one error frame.
///
/// Whether the connection is closed afterwards is a property of the code:
/// authentication failures close with 4001, subscribe-time authorization
/// failures with 1001, and validation failures leave the socket open.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}: {message}", code.as_str())]
pub struct RelayError {
    code: ErrorType,
    message: String,
    data: Option<Value>,
}

impl RelayError {
    pub fn new(code: ErrorType, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn from_code(code: ErrorType) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn code(&self) -> ErrorType {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn close_code(&self) -> Option<u16> {
        close_code_for(self.code)
    }

    pub fn to_frame(&self) -> ErrorFrame {
        let frame = ErrorFrame::new(self.code, self.message.clone());
        match &self.data {
            Some(data) => frame.with_data(data.clone()),
            None => frame,
        }
    }
}

pub const fn close_code_for(code: ErrorType) -> Option<u16> {
    match code {
        ErrorType::Auth => Some(CLOSE_AUTH_FAILED),
        ErrorType::NotAllowed | ErrorType::InvalidId | ErrorType::NotAMember => {
            Some(CLOSE_DENIED)
        }
        ErrorType::InvalidDataType
        | ErrorType::InvalidEntry
        | ErrorType::NonExistent
        | ErrorType::InvalidOwner
        | ErrorType::ServerError => None,
    }
}
