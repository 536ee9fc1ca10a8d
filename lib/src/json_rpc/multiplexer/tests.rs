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

#![cfg(test)]

use super::{Config, Event, Multiplexer, NotificationPayload, ProtocolError};
use crate::json_rpc::{methods, RpcError, ServerToClient, WireId};

fn new_multiplexer() -> Multiplexer<u32, &'static str> {
    Multiplexer::new(Config {
        requests_capacity: 4,
        subscriptions_capacity: 4,
        randomness_seed: [0; 32],
    })
}

fn response(id: &str, value: serde_json::Value) -> ServerToClient {
    ServerToClient::Response {
        id: WireId::Str(id.into()),
        outcome: Ok(value),
    }
}

#[test]
fn request_ids_unique() {
    let mut mux = new_multiplexer();
    let id1 = mux.start_request("foo", Vec::new(), 1);
    let id2 = mux.start_request("foo", Vec::new(), 2);
    assert_ne!(id1, id2);

    let rq1 = mux.next_request().unwrap();
    let rq2 = mux.next_request().unwrap();
    assert!(mux.next_request().is_none());
    assert_eq!(rq1.id, id1.as_str());
    assert_eq!(rq2.id, id2.as_str());
}

#[test]
fn response_resolves_once() {
    let mut mux = new_multiplexer();
    let id = mux.start_request("foo", Vec::new(), 7);
    let _ = mux.next_request().unwrap();

    match mux
        .inject_server_message(response(id.as_str(), serde_json::json!(true)))
        .unwrap()
    {
        Some(Event::Response {
            request_id,
            user_data,
            outcome,
        }) => {
            assert_eq!(request_id, id);
            assert_eq!(user_data, 7);
            assert_eq!(outcome, Ok(serde_json::json!(true)));
        }
        _ => panic!(),
    }

    assert!(matches!(
        mux.inject_server_message(response(id.as_str(), serde_json::json!(true))),
        Err(ProtocolError::UnknownRequest(_))
    ));
    assert_eq!(mux.num_pending_requests(), 0);
}

#[test]
fn rpc_error_passed_through() {
    let mut mux = new_multiplexer();
    let id = mux.start_request("foo", Vec::new(), 0);
    let _ = mux.next_request().unwrap();

    let event = mux
        .inject_server_message(ServerToClient::Response {
            id: WireId::Str(id.as_str().into()),
            outcome: Err(RpcError {
                code: -32602,
                message: "Invalid params".into(),
                data: None,
            }),
        })
        .unwrap();
    assert!(matches!(
        event,
        Some(Event::Response {
            outcome: Err(RpcError { code: -32602, .. }),
            ..
        })
    ));
}

#[test]
fn unknown_response() {
    let mut mux = new_multiplexer();
    assert!(matches!(
        mux.inject_server_message(response("1", serde_json::Value::Null)),
        Err(ProtocolError::UnknownRequest(_))
    ));
    assert!(matches!(
        mux.inject_server_message(ServerToClient::Response {
            id: WireId::Num(1),
            outcome: Ok(serde_json::Value::Null),
        }),
        Err(ProtocolError::NonStringId(WireId::Num(1)))
    ));
}

#[test]
fn cancel_queued_request() {
    let mut mux = new_multiplexer();
    let id = mux.start_request("foo", Vec::new(), 3);
    assert_eq!(mux.cancel_request(&id), Some(3));
    assert_eq!(mux.cancel_request(&id), None);
    assert!(mux.next_request().is_none());
    assert_eq!(mux.num_pending_requests(), 0);
}

#[test]
fn cancel_sent_request_idempotent() {
    let mut mux = new_multiplexer();
    let id = mux.start_request("foo", Vec::new(), 3);
    let _ = mux.next_request().unwrap();

    assert_eq!(mux.cancel_request(&id), Some(3));
    assert_eq!(mux.cancel_request(&id), None);
    assert_eq!(mux.cancel_request(&id), None);

    // The late response is discarded silently.
    assert!(mux
        .inject_server_message(response(id.as_str(), serde_json::Value::Null))
        .unwrap()
        .is_none());
    // A second one isn't.
    assert!(mux
        .inject_server_message(response(id.as_str(), serde_json::Value::Null))
        .is_err());
}

#[test]
fn cancelled_request_retained_until_answered() {
    let mut mux = new_multiplexer();
    let answered = mux.start_request("foo", Vec::new(), 1);
    let silent = mux.start_request("foo", Vec::new(), 2);
    let queued = mux.start_request("foo", Vec::new(), 3);
    let _ = mux.next_request().unwrap();
    let _ = mux.next_request().unwrap();
    assert!(mux.has_queued_requests());

    mux.cancel_request(&answered);
    mux.cancel_request(&silent);
    mux.cancel_request(&queued);
    assert!(!mux.has_queued_requests());
    assert_eq!(mux.num_pending_requests(), 2);

    assert!(mux
        .inject_server_message(response(answered.as_str(), serde_json::Value::Null))
        .unwrap()
        .is_none());
    assert_eq!(mux.num_pending_requests(), 1);

    // The server never answers the other one.
    let disconnected = mux.disconnect();
    assert!(disconnected.requests.is_empty());
    assert_eq!(mux.num_pending_requests(), 0);
}

#[test]
fn notifications_routed_to_attached() {
    let mut mux = new_multiplexer();
    assert!(mux.attach("abc", "follow").is_none());

    match mux
        .inject_server_message(ServerToClient::FollowEvent {
            subscription: "abc".into(),
            event: methods::FollowEvent::Stop {},
        })
        .unwrap()
    {
        Some(Event::Notification {
            subscription_id,
            user_data,
            payload,
        }) => {
            assert_eq!(subscription_id, "abc");
            assert_eq!(*user_data, "follow");
            assert_eq!(
                payload,
                NotificationPayload::FollowEvent(methods::FollowEvent::Stop {})
            );
        }
        _ => panic!(),
    }

    // Unknown subscription.
    assert!(mux
        .inject_server_message(ServerToClient::Notification {
            method: "transactionWatch_v1_watchEvent".into(),
            subscription: WireId::Str("other".into()),
            result: serde_json::json!({"event": "validated"}),
        })
        .unwrap()
        .is_none());
}

#[test]
fn subscription_user_data_replaced() {
    let mut mux = new_multiplexer();
    assert!(!mux.is_attached("abc"));
    assert!(mux.subscription_user_data_mut("abc").is_none());

    mux.attach("abc", "follow");
    assert!(mux.is_attached("abc"));
    *mux.subscription_user_data_mut("abc").unwrap() = "watch";
    assert_eq!(mux.attach("abc", "other"), Some("watch"));

    assert_eq!(mux.detach("abc"), Some("other"));
    assert!(!mux.is_attached("abc"));
}

#[test]
fn detach_idempotent() {
    let mut mux = new_multiplexer();
    mux.attach("abc", "tx");
    assert_eq!(mux.detach("abc"), Some("tx"));
    assert_eq!(mux.detach("abc"), None);

    assert!(mux
        .inject_server_message(ServerToClient::Notification {
            method: "transactionWatch_v1_watchEvent".into(),
            subscription: WireId::Str("abc".into()),
            result: serde_json::json!({"event": "validated"}),
        })
        .unwrap()
        .is_none());
}

#[test]
fn disconnect_drains_everything() {
    let mut mux = new_multiplexer();
    let sent = mux.start_request("foo", Vec::new(), 1);
    let _ = mux.next_request().unwrap();
    let cancelled = mux.start_request("foo", Vec::new(), 2);
    let _ = mux.next_request().unwrap();
    mux.cancel_request(&cancelled);
    let _queued = mux.start_request("foo", Vec::new(), 3);
    mux.attach("abc", "follow");

    let disconnected = mux.disconnect();
    let mut requests = disconnected
        .requests
        .into_iter()
        .map(|(_, user_data)| user_data)
        .collect::<Vec<_>>();
    requests.sort();
    assert_eq!(requests, [1, 3]);
    assert_eq!(disconnected.subscriptions, [(String::from("abc"), "follow")]);

    assert!(mux.next_request().is_none());
    assert_eq!(mux.num_pending_requests(), 0);
    assert!(mux
        .inject_server_message(response(sent.as_str(), serde_json::Value::Null))
        .is_err());
}

#[test]
fn independent_instances() {
    let mut mux1 = new_multiplexer();
    let mut mux2 = new_multiplexer();
    let id = mux1.start_request("foo", Vec::new(), 1);
    let _ = mux1.next_request().unwrap();

    assert!(mux2
        .inject_server_message(response(id.as_str(), serde_json::Value::Null))
        .is_err());
    assert!(mux1
        .inject_server_message(response(id.as_str(), serde_json::Value::Null))
        .unwrap()
        .is_some());
}
