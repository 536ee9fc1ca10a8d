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

//! Correlates the requests sent to a JSON-RPC server with their responses, and the
//! notifications sent by that server with the subscriptions they belong to.
//!
//! The [`Multiplexer`] generates the identifier of every request it sends. These identifiers
//! are unique within a [`Multiplexer`], but several [`Multiplexer`]s can exist at the same time,
//! for example one per server.
//!
//! # Usage
//!
//! - Call [`Multiplexer::start_request`] in order to queue a request, then
//! [`Multiplexer::next_request`] to pull the requests to send to the server.
//! - Messages received from the server must be passed to [`Multiplexer::inject_server_message`].
//! - Once a subscription has been created on the server side, call [`Multiplexer::attach`] in
//! order to receive its notifications. Notifications that concern a subscription that hasn't
//! been attached are silently discarded.
//!
//! Each request is resolved exactly once: either through [`Event::Response`], or through
//! [`Multiplexer::cancel_request`], or through [`Multiplexer::disconnect`].

use super::{methods, ClientRequest, RpcError, ServerToClient, WireId};
use crate::util::{SeedSource, SipHasherBuild};

use alloc::{
    collections::VecDeque,
    string::{String, ToString as _},
    vec::Vec,
};
use core::fmt;

mod tests;

/// Configuration for a [`Multiplexer`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of requests to pre-allocate space for.
    pub requests_capacity: usize,

    /// Number of subscriptions to pre-allocate space for.
    pub subscriptions_capacity: usize,

    /// Seed used to initialize the hash maps whose keys are chosen by the server.
    pub randomness_seed: [u8; 32],
}

/// Identifier of a request within a [`Multiplexer`].
///
/// This is also the identifier sent on the wire, as a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    /// Returns the identifier as found in the `id` field of the request.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// See [the module-level documentation](..).
pub struct Multiplexer<TRq, TSub> {
    /// Identifier to assign to the next request.
    next_request_id: u64,

    /// Requests that haven't been pulled with [`Multiplexer::next_request`] yet.
    queued: VecDeque<ClientRequest>,

    /// Requests that haven't been answered yet, including the ones in
    /// [`Multiplexer::queued`]. Indexed by request ID.
    pending: hashbrown::HashMap<String, PendingCall<TRq>, SipHasherBuild>,

    /// Subscriptions that have been attached. Indexed by subscription ID.
    subscriptions: hashbrown::HashMap<String, TSub, SipHasherBuild>,
}

enum PendingCall<TRq> {
    /// Waiting for the response.
    Active(TRq),
    /// The request has been sent but then cancelled. Its response must be ignored.
    Cancelled,
}

impl<TRq, TSub> Multiplexer<TRq, TSub> {
    /// Initializes a new [`Multiplexer`] with no request and no subscription.
    pub fn new(config: Config) -> Self {
        let mut seeds = SeedSource::new(config.randomness_seed);

        Multiplexer {
            next_request_id: 1,
            queued: VecDeque::with_capacity(config.requests_capacity),
            pending: hashbrown::HashMap::with_capacity_and_hasher(
                config.requests_capacity,
                seeds.hasher(),
            ),
            subscriptions: hashbrown::HashMap::with_capacity_and_hasher(
                config.subscriptions_capacity,
                seeds.hasher(),
            ),
        }
    }

    /// Queues a request to send to the server. The `user_data` is later returned when the
    /// request is resolved.
    pub fn start_request(
        &mut self,
        method: impl Into<String>,
        params: Vec<serde_json::Value>,
        user_data: TRq,
    ) -> RequestId {
        let id = self.next_request_id.to_string();
        self.next_request_id += 1;

        let _prev_value = self
            .pending
            .insert(id.clone(), PendingCall::Active(user_data));
        debug_assert!(_prev_value.is_none());

        self.queued.push_back(ClientRequest {
            id: id.clone(),
            method: method.into(),
            params,
        });

        RequestId(id)
    }

    /// Pulls the next request to send to the server.
    pub fn next_request(&mut self) -> Option<ClientRequest> {
        self.queued.pop_front()
    }

    /// Returns `true` if [`Multiplexer::next_request`] would return `Some`.
    pub fn has_queued_requests(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Cancels a request.
    ///
    /// If the request hasn't been pulled with [`Multiplexer::next_request`] yet, it is removed
    /// from the queue and will never be sent. Otherwise, its response will be silently
    /// discarded when it arrives.
    ///
    /// Returns the user data of the request, or `None` if the request has already been
    /// resolved or cancelled. Calling this function multiple times is harmless.
    ///
    /// A request that has already been sent keeps occupying an entry until the server answers
    /// it, as its identifier must not be reported as unknown when the response arrives. A
    /// server that never answers cancelled requests makes these entries accumulate, up to one
    /// per request ever sent. They are only freed by [`Multiplexer::disconnect`].
    pub fn cancel_request(&mut self, request_id: &RequestId) -> Option<TRq> {
        match self.pending.get(&request_id.0) {
            Some(PendingCall::Active(_)) => {}
            Some(PendingCall::Cancelled) | None => return None,
        }

        if let Some(position) = self.queued.iter().position(|rq| rq.id == request_id.0) {
            self.queued.remove(position);
            match self.pending.remove(&request_id.0) {
                Some(PendingCall::Active(user_data)) => Some(user_data),
                Some(PendingCall::Cancelled) | None => None,
            }
        } else {
            match self
                .pending
                .insert(request_id.0.clone(), PendingCall::Cancelled)
            {
                Some(PendingCall::Active(user_data)) => Some(user_data),
                Some(PendingCall::Cancelled) | None => None,
            }
        }
    }

    /// Returns the number of requests that haven't been answered yet, including the cancelled
    /// requests whose response hasn't arrived yet. See [`Multiplexer::cancel_request`].
    pub fn num_pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Starts receiving the notifications of the given subscription. The `user_data` is passed
    /// back with each notification.
    ///
    /// If the subscription was already attached, its user data is replaced and the previous
    /// one returned.
    pub fn attach(&mut self, subscription_id: impl Into<String>, user_data: TSub) -> Option<TSub> {
        self.subscriptions.insert(subscription_id.into(), user_data)
    }

    /// Stops receiving the notifications of the given subscription. Further notifications are
    /// silently discarded.
    ///
    /// Returns `None` if the subscription wasn't attached. Calling this function multiple times
    /// is harmless.
    pub fn detach(&mut self, subscription_id: &str) -> Option<TSub> {
        self.subscriptions.remove(subscription_id)
    }

    /// Returns `true` if the given subscription is attached.
    pub fn is_attached(&self, subscription_id: &str) -> bool {
        self.subscriptions.contains_key(subscription_id)
    }

    /// Returns the user data of an attached subscription.
    pub fn subscription_user_data_mut(&mut self, subscription_id: &str) -> Option<&mut TSub> {
        self.subscriptions.get_mut(subscription_id)
    }

    /// Injects a message received from the server.
    ///
    /// Returns `Ok(None)` if the message has been discarded, which happens for responses to
    /// cancelled requests and for notifications concerning subscriptions that aren't attached.
    ///
    /// An error is returned if the message doesn't match what the server is allowed to send.
    /// The state of the [`Multiplexer`] is unaffected by such an error.
    pub fn inject_server_message(
        &mut self,
        message: ServerToClient,
    ) -> Result<Option<Event<'_, TRq, TSub>>, ProtocolError> {
        match message {
            ServerToClient::Response { id, outcome } => {
                let WireId::Str(id) = id else {
                    return Err(ProtocolError::NonStringId(id));
                };

                match self.pending.remove(&id) {
                    Some(PendingCall::Active(user_data)) => {
                        // A response to a request that hasn't been sent yet is strange, but
                        // resolves the request nonetheless.
                        if !self.queued.is_empty() {
                            self.queued.retain(|rq| rq.id != id);
                        }

                        Ok(Some(Event::Response {
                            request_id: RequestId(id),
                            user_data,
                            outcome,
                        }))
                    }
                    Some(PendingCall::Cancelled) => Ok(None),
                    None => Err(ProtocolError::UnknownRequest(id)),
                }
            }
            ServerToClient::UnattributedError(error) => {
                Err(ProtocolError::UnattributedError(error))
            }
            ServerToClient::Notification {
                method,
                subscription,
                result,
            } => {
                let WireId::Str(subscription) = subscription else {
                    return Err(ProtocolError::NonStringId(subscription));
                };

                let Some(user_data) = self.subscriptions.get_mut(&subscription) else {
                    return Ok(None);
                };

                Ok(Some(Event::Notification {
                    subscription_id: subscription,
                    user_data,
                    payload: NotificationPayload::Json { method, result },
                }))
            }
            ServerToClient::FollowEvent {
                subscription,
                event,
            } => {
                let Some(user_data) = self.subscriptions.get_mut(&subscription) else {
                    return Ok(None);
                };

                Ok(Some(Event::Notification {
                    subscription_id: subscription,
                    user_data,
                    payload: NotificationPayload::FollowEvent(event),
                }))
            }
        }
    }

    /// Resolves every pending request and detaches every subscription. Must be called when the
    /// connection to the server is lost.
    ///
    /// The [`Multiplexer`] is empty afterwards and can be used again with a new connection.
    pub fn disconnect(&mut self) -> Disconnected<TRq, TSub> {
        self.queued.clear();

        let requests = self
            .pending
            .drain()
            .filter_map(|(id, call)| match call {
                PendingCall::Active(user_data) => Some((RequestId(id), user_data)),
                PendingCall::Cancelled => None,
            })
            .collect();

        let subscriptions = self.subscriptions.drain().collect();

        Disconnected {
            requests,
            subscriptions,
        }
    }
}

impl<TRq, TSub> fmt::Debug for Multiplexer<TRq, TSub> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("queued", &self.queued.len())
            .field("pending", &self.pending.len())
            .field("subscriptions", &self.subscriptions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Event generated by [`Multiplexer::inject_server_message`].
#[derive(Debug)]
pub enum Event<'a, TRq, TSub> {
    /// A request has been answered.
    Response {
        request_id: RequestId,
        /// User data passed to [`Multiplexer::start_request`].
        user_data: TRq,
        /// Result of the request.
        outcome: Result<serde_json::Value, RpcError>,
    },

    /// Notification concerning an attached subscription.
    Notification {
        subscription_id: String,
        /// User data passed to [`Multiplexer::attach`].
        user_data: &'a mut TSub,
        payload: NotificationPayload,
    },
}

/// Content of an [`Event::Notification`].
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    /// Notification in its JSON form.
    Json {
        method: String,
        result: serde_json::Value,
    },
    /// Already-decoded `chainHead_v1_followEvent` notification.
    FollowEvent(methods::FollowEvent),
}

/// Output of [`Multiplexer::disconnect`].
#[derive(Debug)]
pub struct Disconnected<TRq, TSub> {
    /// Requests that were waiting for a response, with their user data.
    pub requests: Vec<(RequestId, TRq)>,
    /// Subscriptions that were attached, with their user data.
    pub subscriptions: Vec<(String, TSub)>,
}

/// Message sent by the server that is invalid in the current state.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum ProtocolError {
    /// Received a response whose ID doesn't match any request, or a second response to the
    /// same request.
    #[display("Response to unknown request {_0:?}")]
    UnknownRequest(#[error(not(source))] String),
    /// Request and subscription IDs are expected to be strings at this point.
    #[display("Unexpected non-string identifier {_0}")]
    NonStringId(#[error(not(source))] WireId),
    /// The server has sent back an error that isn't attributed to any request.
    #[display("Unattributed error: {_0}")]
    UnattributedError(RpcError),
}
