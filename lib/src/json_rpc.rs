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

//! JSON-RPC client-side messages.
//!
//! The types of this module are the messages that travel between the transport, the
//! [`crate::compat`] pipeline, and the [`multiplexer`]. Messages coming from the server are
//! decoded into [`ServerToClient`] using [`parse::parse_server_message`], and requests are
//! encoded from [`ClientRequest`] using [`parse::build_request`].

use alloc::string::{String, ToString as _};
use alloc::vec::Vec;
use core::fmt;

pub mod methods;
pub mod multiplexer;
pub mod parse;

/// Identifier of a request or of a subscription, as found on the wire.
///
/// The JSON-RPC specification allows identifiers to be either numbers or strings. Some servers
/// generate numeric subscription identifiers, while the rest of this library always manipulates
/// strings. See [`crate::compat`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireId {
    Num(u64),
    Str(String),
}

impl WireId {
    /// Returns the string form of the identifier, or `None` if it is a number.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireId::Str(s) => Some(s),
            WireId::Num(_) => None,
        }
    }

    /// Turns the identifier into a string. Numbers are turned into their decimal representation.
    pub fn into_normalized(self) -> String {
        match self {
            WireId::Str(s) => s,
            WireId::Num(n) => n.to_string(),
        }
    }

    /// Returns the JSON representation of this identifier.
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            WireId::Str(s) => serde_json::Value::String(s.clone()),
            WireId::Num(n) => serde_json::Value::Number((*n).into()),
        }
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireId::Str(s) => fmt::Debug::fmt(s, f),
            WireId::Num(n) => fmt::Display::fmt(n, f),
        }
    }
}

impl From<&str> for WireId {
    fn from(id: &str) -> WireId {
        WireId::Str(id.into())
    }
}

/// Message sent by a JSON-RPC server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerToClient {
    /// Response to a request.
    Response {
        /// Identifier of the request this response corresponds to.
        id: WireId,
        /// Value of the `result` field, or the content of the `error` field.
        outcome: Result<serde_json::Value, RpcError>,
    },

    /// Error that the server couldn't attribute to any request, typically because it couldn't
    /// parse the request.
    UnattributedError(RpcError),

    /// Notification concerning a subscription.
    Notification {
        /// Name of the method found in the notification.
        method: String,
        /// Identifier of the subscription this notification belongs to.
        subscription: WireId,
        /// Value of the `result` field of the notification.
        result: serde_json::Value,
    },

    /// Notification of a `chainHead_v1_follow` subscription, already decoded.
    ///
    /// Never produced by [`parse::parse_server_message`]. Produced by the
    /// [`crate::compat`] pipeline.
    FollowEvent {
        /// Identifier of the `chainHead_v1_follow` subscription.
        subscription: String,
        /// The event.
        event: methods::FollowEvent,
    },
}

/// Request to send to a JSON-RPC server.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    /// Identifier of the request. Always sent as a JSON string.
    pub id: String,
    /// Name of the method to call.
    pub method: String,
    /// Positional parameters of the call.
    pub params: Vec<serde_json::Value>,
}

/// Error object returned by a JSON-RPC server.
#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
#[display("JSON-RPC error {code}: {message}")]
pub struct RpcError {
    /// Integer indicating the nature of the error.
    ///
    /// See [the JSON-RPC specification](https://www.jsonrpc.org/specification#error_object)
    /// for reference.
    pub code: i64,
    /// Short description of the error.
    pub message: String,
    /// Additional data associated with the error. `None` if omitted.
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Error code indicating that the method doesn't exist or isn't available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
}
