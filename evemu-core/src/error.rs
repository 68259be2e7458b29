use serde::{Deserialize, Serialize};
use std::fmt;

use crate::args::DecodeError;
use crate::ids::{EntityId, HandleId};
use crate::value::WireValue;

/// Type tag of the object sent back to the client in place of a result.
pub const CALL_ERROR_TYPE: &str = "evemu.CallError";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    DecodeError,
    ServiceNotFound,
    MethodNotFound,
    BindFailed,
    HandleExpired,
    HandlerFault,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::DecodeError => "decode_error",
            ErrorCode::ServiceNotFound => "service_not_found",
            ErrorCode::MethodNotFound => "method_not_found",
            ErrorCode::BindFailed => "bind_failed",
            ErrorCode::HandleExpired => "handle_expired",
            ErrorCode::HandlerFault => "handler_fault",
        };
        write!(f, "{}", s)
    }
}

/// Every way a remote call can fail, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("Failed to decode arguments: {0}")]
    Decode(#[from] DecodeError),

    #[error("Service '{service}' not found")]
    ServiceNotFound { service: String },

    #[error("Method '{method}' not found on service '{service}'")]
    MethodNotFound { service: String, method: String },

    #[error("Unable to bind '{service}' to entity {entity}")]
    BindFailed { service: String, entity: EntityId },

    #[error("Bound object {handle} has been released")]
    HandleExpired { handle: HandleId },

    #[error("{service}::{method} failed: {cause}")]
    HandlerFault {
        service: String,
        method: String,
        cause: String,
    },
}

impl CallError {
    pub fn service_not_found(service: impl Into<String>) -> Self {
        CallError::ServiceNotFound {
            service: service.into(),
        }
    }

    pub fn method_not_found(service: impl Into<String>, method: impl Into<String>) -> Self {
        CallError::MethodNotFound {
            service: service.into(),
            method: method.into(),
        }
    }

    pub fn handler_fault(
        service: impl Into<String>,
        method: impl Into<String>,
        cause: impl fmt::Display,
    ) -> Self {
        CallError::HandlerFault {
            service: service.into(),
            method: method.into(),
            cause: cause.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CallError::Decode(_) => ErrorCode::DecodeError,
            CallError::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            CallError::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            CallError::BindFailed { .. } => ErrorCode::BindFailed,
            CallError::HandleExpired { .. } => ErrorCode::HandleExpired,
            CallError::HandlerFault { .. } => ErrorCode::HandlerFault,
        }
    }

    /// Typed failure indicator returned to the remote caller.
    pub fn to_wire(&self) -> WireValue {
        WireValue::object(
            CALL_ERROR_TYPE,
            WireValue::dict([
                ("code", WireValue::from(self.code().to_string())),
                ("message", WireValue::from(self.to_string())),
            ]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CallError::service_not_found("agentMgr").code(),
            ErrorCode::ServiceNotFound
        );
        assert_eq!(
            CallError::method_not_found("agentMgr", "Nope").code(),
            ErrorCode::MethodNotFound
        );
        assert_eq!(
            CallError::from(DecodeError::Arity {
                expected: 1,
                actual: 0
            })
            .code(),
            ErrorCode::DecodeError
        );
        assert_eq!(
            CallError::HandleExpired {
                handle: HandleId::new(3)
            }
            .code(),
            ErrorCode::HandleExpired
        );
    }

    #[test]
    fn test_error_display() {
        let err = CallError::handler_fault("agentMgr", "GetAgents", "cache miss");
        let display = err.to_string();
        assert!(display.contains("agentMgr::GetAgents"));
        assert!(display.contains("cache miss"));
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::HandleExpired).unwrap();
        assert_eq!(json, "\"handle_expired\"");
        let code: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(code, ErrorCode::HandleExpired);
    }

    #[test]
    fn test_to_wire_shape() {
        let err = CallError::method_not_found("agentMgr", "Nope");
        let wire = err.to_wire();
        let WireValue::Object { type_tag, payload } = &wire else {
            panic!("expected object");
        };
        assert_eq!(type_tag, CALL_ERROR_TYPE);
        assert_eq!(
            payload.dict_get(&WireValue::from("code")),
            Some(&WireValue::from("method_not_found"))
        );
    }
}
