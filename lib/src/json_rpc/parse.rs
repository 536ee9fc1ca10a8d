// Smoldot
// Copyright (C) 2019-2022  Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Parse JSON-RPC responses and notifications sent by a server, and build requests.

use super::{ClientRequest, RpcError, ServerToClient, WireId};

use alloc::{borrow::Cow, string::String, vec::Vec};

/// Parses a JSON-encoded message sent by a JSON-RPC server.
///
/// The message can be either a response to a request or a subscription notification.
pub fn parse_server_message(message_json: &str) -> Result<ServerToClient, ParseError> {
    let error = match serde_json::from_str::<SerdeSuccess>(message_json) {
        Err(err) => err,
        Ok(SerdeSuccess {
            jsonrpc: _,
            id,
            result,
        }) => {
            return Ok(ServerToClient::Response {
                id: parse_id(id)?,
                outcome: Ok(result),
            });
        }
    };

    match serde_json::from_str::<SerdeFailure>(message_json) {
        Ok(SerdeFailure {
            jsonrpc: _,
            id,
            error,
        }) if id.get() != "null" => {
            return Ok(ServerToClient::Response {
                id: parse_id(id)?,
                outcome: Err(error.into()),
            });
        }
        Ok(SerdeFailure {
            jsonrpc: _,
            id: _,
            error,
        }) => return Ok(ServerToClient::UnattributedError(error.into())),
        Err(_) => {}
    }

    match serde_json::from_str::<SerdeNotification>(message_json) {
        Ok(SerdeNotification {
            jsonrpc: _,
            method,
            params:
                SerdeNotificationParams {
                    subscription,
                    result,
                },
        }) => Ok(ServerToClient::Notification {
            method: method.into_owned(),
            subscription: parse_id(subscription)?,
            result,
        }),
        Err(_) => Err(ParseError(error)),
    }
}

/// Builds a JSON request.
///
/// The identifier of the request is always encoded as a JSON string.
pub fn build_request(request: &ClientRequest) -> String {
    // Serializing a `serde_json::Value` can't fail.
    serde_json::to_string(&SerdeRequest {
        jsonrpc: SerdeVersion::V2,
        id: &request.id,
        method: &request.method,
        params: &request.params,
    })
    .unwrap_or_else(|_| unreachable!())
}

/// Error while parsing a message.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub struct ParseError(#[error(not(source))] serde_json::Error);

fn parse_id(id: &serde_json::value::RawValue) -> Result<WireId, ParseError> {
    // Because of https://github.com/serde-rs/json/issues/742, we can't use ̀`&str`.
    #[derive(serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    #[serde(untagged)]
    enum SerdeId<'a> {
        Num(u64),
        Str(Cow<'a, str>),
    }

    match serde_json::from_str::<SerdeId>(id.get()) {
        Ok(SerdeId::Num(n)) => Ok(WireId::Num(n)),
        Ok(SerdeId::Str(s)) => Ok(WireId::Str(s.into_owned())),
        Err(err) => Err(ParseError(err)),
    }
}

#[derive(Debug, serde::Serialize)]
struct SerdeRequest<'a> {
    jsonrpc: SerdeVersion,
    id: &'a str,
    method: &'a str,
    params: &'a Vec<serde_json::Value>,
}

#[derive(Debug, PartialEq, Clone, Copy, Hash, Eq)]
enum SerdeVersion {
    V2,
}

impl serde::Serialize for SerdeVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match *self {
            SerdeVersion::V2 => "2.0".serialize(serializer),
        }
    }
}

impl<'a> serde::Deserialize<'a> for SerdeVersion {
    fn deserialize<D>(deserializer: D) -> Result<SerdeVersion, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let string = <Cow<'a, str>>::deserialize(deserializer)?;
        if string != "2.0" {
            return Err(serde::de::Error::custom("unknown version"));
        }
        Ok(SerdeVersion::V2)
    }
}

#[derive(Debug, serde::Deserialize)]
struct SerdeSuccess<'a> {
    // Only checked during deserialization.
    #[allow(dead_code)]
    jsonrpc: SerdeVersion,
    #[serde(borrow)]
    id: &'a serde_json::value::RawValue,
    result: serde_json::Value,
}

#[derive(Debug, serde::Deserialize)]
struct SerdeFailure<'a> {
    // Only checked during deserialization.
    #[allow(dead_code)]
    jsonrpc: SerdeVersion,
    #[serde(borrow)]
    id: &'a serde_json::value::RawValue,
    error: SerdeError,
}

#[derive(Debug, serde::Deserialize)]
struct SerdeError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl From<SerdeError> for RpcError {
    fn from(error: SerdeError) -> RpcError {
        RpcError {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct SerdeNotification<'a> {
    // Only checked during deserialization.
    #[allow(dead_code)]
    jsonrpc: SerdeVersion,
    #[serde(borrow)]
    method: Cow<'a, str>,
    #[serde(borrow)]
    params: SerdeNotificationParams<'a>,
}

#[derive(Debug, serde::Deserialize)]
struct SerdeNotificationParams<'a> {
    #[serde(borrow)]
    subscription: &'a serde_json::value::RawValue,
    result: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use crate::json_rpc::{ClientRequest, RpcError, ServerToClient, WireId};

    #[test]
    fn parse_response_basic_works() {
        let message =
            super::parse_server_message(r#"{"jsonrpc":"2.0","id":"5","result":true}"#).unwrap();
        assert_eq!(
            message,
            ServerToClient::Response {
                id: WireId::Str("5".into()),
                outcome: Ok(serde_json::Value::Bool(true)),
            }
        );
    }

    #[test]
    fn parse_response_numeric_id() {
        let message =
            super::parse_server_message(r#"{"jsonrpc":"2.0","id":5,"result":null}"#).unwrap();
        assert_eq!(
            message,
            ServerToClient::Response {
                id: WireId::Num(5),
                outcome: Ok(serde_json::Value::Null),
            }
        );
    }

    #[test]
    fn parse_error_response() {
        let message = super::parse_server_message(
            r#"{"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": "1"}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ServerToClient::Response {
                id: WireId::Str("1".into()),
                outcome: Err(RpcError {
                    code: -32601,
                    message: "Method not found".into(),
                    data: None,
                }),
            }
        );
    }

    #[test]
    fn parse_unattributed_error() {
        let message = super::parse_server_message(
            r#"{"jsonrpc": "2.0", "error": {"code": -32700, "message": "Parse error"}, "id": null}"#,
        )
        .unwrap();
        assert!(matches!(
            message,
            ServerToClient::UnattributedError(RpcError { code: -32700, .. })
        ));
    }

    #[test]
    fn parse_notification() {
        let message = super::parse_server_message(
            r#"{"jsonrpc":"2.0","method":"chainHead_v1_followEvent","params":{"subscription":12,"result":{"event":"stop"}}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ServerToClient::Notification {
                method: "chainHead_v1_followEvent".into(),
                subscription: WireId::Num(12),
                result: serde_json::json!({"event": "stop"}),
            }
        );
    }

    #[test]
    fn parse_response_wrong_jsonrpc() {
        assert!(super::parse_server_message(r#"{"jsonrpc":"2.1","id":5,"result":null}"#).is_err());
    }

    #[test]
    fn parse_response_bad_id() {
        assert!(super::parse_server_message(r#"{"jsonrpc":"2.0","id":{},"result":5}"#).is_err());
        assert!(
            super::parse_server_message(r#"{"jsonrpc":"2.0","id":-3,"result":5}"#).is_err()
        );
    }

    #[test]
    fn parse_garbage() {
        assert!(super::parse_server_message("thisisnotproperjsonrpc").is_err());
        assert!(super::parse_server_message(r#"{"jsonrpc":"2.0"}"#).is_err());
    }

    #[test]
    fn build_request() {
        let encoded = super::build_request(&ClientRequest {
            id: "7".into(),
            method: "chainHead_v1_unpin".into(),
            params: vec![serde_json::json!(4), serde_json::json!(["0x01"])],
        });
        assert_eq!(
            encoded,
            r#"{"jsonrpc":"2.0","id":"7","method":"chainHead_v1_unpin","params":[4,["0x01"]]}"#
        );
    }
}
