use serde::{Deserialize, Serialize};
use serde_json::Value;
use shiftlint_provider::{Error, Result};
use std::io::{Read, Write};

/// Upper bound on one frame's payload; anything larger is a protocol error.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Wire-stable method names.
pub mod method {
    pub const CAPABILITIES: &str = "Capabilities";
    pub const INIT: &str = "Init";
    pub const EVALUATE: &str = "Evaluate";
    pub const STOP: &str = "Stop";
    pub const GET_DEPENDENCIES: &str = "GetDependencies";
    pub const GET_DEPENDENCIES_DAG: &str = "GetDependenciesDAG";
    pub const NOTIFY_FILE_CHANGES: &str = "NotifyFileChanges";
    pub const GET_CODE_SNIP: &str = "GetCodeSnip";
    pub const GET_DEPENDENCY_LOCATION: &str = "GetDependencyLocation";
}

/// One call on the wire. `id` correlates the reply; `session_id` is present
/// on every call after `Init`; `token` carries the bearer credential when
/// the endpoint is secured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Error category carried on the wire, mapped back into provider errors on
/// the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    StaleSession,
    UnknownCapability,
    Unsupported,
    Cancelled,
    Evaluate,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

/// Reply matched to a request by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: i64, result: Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(id: i64, code: ErrorCode, message: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Map a provider-side failure onto the wire.
pub fn error_response(id: i64, err: &shiftlint_provider::Error) -> Response {
    use shiftlint_provider::Error as E;
    let code = match err {
        E::Unauthenticated(_) => ErrorCode::Unauthenticated,
        E::StaleSession(_) => ErrorCode::StaleSession,
        E::UnknownCapability(_) => ErrorCode::UnknownCapability,
        E::Unsupported => ErrorCode::Unsupported,
        E::Cancelled => ErrorCode::Cancelled,
        E::Evaluate(_) => ErrorCode::Evaluate,
        _ => ErrorCode::Internal,
    };
    Response::fail(id, code, err.to_string())
}

/// Map a wire error back into the provider error model.
pub fn error_from_wire(err: &RpcError) -> Error {
    match err.code {
        ErrorCode::Unauthenticated => Error::Unauthenticated(err.message.clone()),
        ErrorCode::StaleSession => Error::Transport(err.message.clone()),
        ErrorCode::UnknownCapability => Error::UnknownCapability(err.message.clone()),
        ErrorCode::Unsupported => Error::Unsupported,
        ErrorCode::Cancelled => Error::Cancelled,
        ErrorCode::Evaluate => Error::Evaluate(err.message.clone()),
        ErrorCode::Internal => Error::Transport(err.message.clone()),
    }
}

/// Write one length-prefixed JSON frame: 4-byte big-endian length, then
/// the serialized message.
pub fn write_frame<T: Serialize>(writer: &mut dyn Write, message: &T) -> Result<()> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::Transport("frame too large".to_string()))?;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Transport(format!("frame too large: {} bytes", len)));
    }
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
pub fn read_frame<T: for<'de> Deserialize<'de>>(reader: &mut dyn Read) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(Error::Transport(format!("frame too large: {} bytes", len)));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_round_trip() {
        let request = Request {
            id: 7,
            method: method::EVALUATE.to_string(),
            session_id: Some(42),
            token: None,
            payload: json!({"capability": "file", "conditionInfo": {"pattern": "*.java"}}),
        };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &request).unwrap();

        let decoded: Request = read_frame(&mut buffer.as_slice()).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.method, method::EVALUATE);
        assert_eq!(decoded.session_id, Some(42));
        assert_eq!(decoded.payload["capability"], json!("file"));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&u32::MAX.to_be_bytes());
        buffer.extend_from_slice(b"junk");
        let err = read_frame::<Request>(&mut buffer.as_slice()).unwrap_err();
        assert!(err.to_string().contains("frame too large"));
    }

    #[test]
    fn truncated_frame_is_an_io_error() {
        let request = Request {
            id: 1,
            method: method::STOP.to_string(),
            session_id: None,
            token: None,
            payload: Value::Null,
        };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &request).unwrap();
        buffer.truncate(buffer.len() - 2);
        assert!(read_frame::<Request>(&mut buffer.as_slice()).is_err());
    }

    #[test]
    fn wire_errors_map_back_to_provider_errors() {
        let err = error_from_wire(&RpcError {
            code: ErrorCode::Unauthenticated,
            message: "no token".to_string(),
        });
        assert!(matches!(err, Error::Unauthenticated(_)));

        let err = error_from_wire(&RpcError {
            code: ErrorCode::Cancelled,
            message: String::new(),
        });
        assert!(err.is_cancelled());
    }
}
