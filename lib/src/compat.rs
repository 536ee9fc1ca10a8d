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

//! Pipeline of stages that sit between the transport and the
//! [`crate::json_rpc::multiplexer::Multiplexer`] and that repair the ways in which JSON-RPC
//! servers deviate from the canonical behaviour of the `chainHead` and `transactionWatch`
//! families of functions.
//!
//! Each [`Stage`] consumes messages travelling in one direction and produces zero or more
//! messages travelling in either direction. A [`Pipeline`] is an ordered list of stages. The
//! first stage is adjacent to the transport, and the last stage is adjacent to the multiplexer.
//!
//! ```text
//!             push_server_to_client                  pop_server_to_client
//! transport ---------------------> [0] [1] ... [n] --------------------> multiplexer
//!           <--------------------- [0] [1] ... [n] <--------------------
//!             pop_client_to_server                   push_client_to_server
//! ```
//!
//! Messages that travel along the same edge in the same direction are never reordered by the
//! [`Pipeline`] itself. Stages, however, are free to buffer, drop, or reorder messages.
//!
//! The default list of stages, as created by [`Pipeline::new`], is:
//!
//! - [`numeric_ids`]: turns numeric identifiers into strings.
//! - [`translate`]: converts legacy method names, and decodes `chainHead_v1_followEvent`
//! notifications into [`ServerToClient::FollowEvent`].
//! - [`reorder`]: makes sure that the parent of a block is always announced before that block.
//! - [`premature`]: delays events that refer to blocks that haven't been announced yet.
//! - [`unpin`]: removes from `chainHead_v1_unpin` requests the blocks that aren't pinned.
//! - [`descendants`]: normalizes the return value of `chainHead_v1_storage`.
//! - [`chain_spec`]: falls back to legacy functions for `chainSpec_v1_*` requests.

use crate::{
    json_rpc::{methods, ClientRequest, ServerToClient, WireId},
    util::{SeedSource, SipHasherBuild},
};

use alloc::{
    boxed::Box,
    collections::VecDeque,
    format,
    string::{String, ToString as _},
    vec,
    vec::Vec,
};
use core::fmt;

pub mod chain_spec;
pub mod descendants;
pub mod numeric_ids;
pub mod premature;
pub mod reorder;
pub mod translate;
pub mod unpin;

mod tests;

/// Configuration for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct Config {
    /// If `true`, requests are sent to the server with the `*_unstable_*` names instead of the
    /// `*_v1_*` names.
    pub legacy_method_names: bool,

    /// Maximum number of follow events that a stage is allowed to buffer for a single
    /// subscription. When this limit is exceeded, the subscription is stopped.
    pub max_buffered_events: usize,

    /// Seed used to initialize the hash maps whose keys are chosen by the server.
    pub randomness_seed: [u8; 32],
}

/// One element of a [`Pipeline`].
pub trait Stage: Send {
    /// Processes a message travelling from the server to the client.
    fn server_to_client(&mut self, message: ServerToClient, output: &mut StageOutput);

    /// Processes a request travelling from the client to the server.
    fn client_to_server(&mut self, request: ClientRequest, output: &mut StageOutput);
}

/// Messages produced by a [`Stage`].
#[derive(Debug, Default)]
pub struct StageOutput {
    to_client: VecDeque<ServerToClient>,
    to_server: VecDeque<ClientRequest>,
}

impl StageOutput {
    /// Emits a message towards the client, in other words towards the next stage.
    pub fn to_client(&mut self, message: ServerToClient) {
        self.to_client.push_back(message);
    }

    /// Emits a request towards the server, in other words towards the previous stage.
    pub fn to_server(&mut self, request: ClientRequest) {
        self.to_server.push_back(request);
    }
}

/// See [the module-level documentation](..).
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    to_client: VecDeque<ServerToClient>,
    to_server: VecDeque<ClientRequest>,
    scratch: StageOutput,
}

enum Work {
    /// Message that must be processed by the stage with the given index. If the index is equal
    /// to the number of stages, the message goes to the multiplexer.
    ToClient(usize, ServerToClient),
    /// Request that must be processed by the stage whose index is the given value minus one.
    /// If the value is 0, the request goes to the transport.
    ToServer(usize, ClientRequest),
}

impl Pipeline {
    /// Builds a new [`Pipeline`] with the default list of stages.
    pub fn new(config: Config) -> Self {
        let mut seeds = SeedSource::new(config.randomness_seed);

        Self::with_stages(vec![
            Box::new(numeric_ids::NumericIds::new(&mut seeds)) as Box<dyn Stage>,
            Box::new(translate::Translate::new(
                config.legacy_method_names,
                &mut seeds,
            )),
            Box::new(reorder::Reorder::new(config.max_buffered_events, &mut seeds)),
            Box::new(premature::Premature::new(
                config.max_buffered_events,
                &mut seeds,
            )),
            Box::new(unpin::Unpin::new(&mut seeds)),
            Box::new(descendants::Descendants::new(&mut seeds)),
            Box::new(chain_spec::ChainSpec::new(&mut seeds)),
        ])
    }

    /// Builds a new [`Pipeline`] with the given list of stages. The first stage is adjacent to
    /// the transport.
    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Pipeline {
            stages,
            to_client: VecDeque::new(),
            to_server: VecDeque::new(),
            scratch: StageOutput::default(),
        }
    }

    /// Injects a message received from the server.
    pub fn push_server_to_client(&mut self, message: ServerToClient) {
        let mut work = VecDeque::with_capacity(4);
        work.push_back(Work::ToClient(0, message));
        self.run(work);
    }

    /// Pulls the next message to pass to the multiplexer.
    pub fn pop_server_to_client(&mut self) -> Option<ServerToClient> {
        self.to_client.pop_front()
    }

    /// Injects a request that the client wants to send to the server.
    pub fn push_client_to_server(&mut self, request: ClientRequest) {
        let mut work = VecDeque::with_capacity(4);
        work.push_back(Work::ToServer(self.stages.len(), request));
        self.run(work);
    }

    /// Pulls the next request to send to the server.
    pub fn pop_client_to_server(&mut self) -> Option<ClientRequest> {
        self.to_server.pop_front()
    }

    fn run(&mut self, mut work: VecDeque<Work>) {
        while let Some(item) = work.pop_front() {
            let stage_index = match item {
                Work::ToClient(index, message) => {
                    let Some(stage) = self.stages.get_mut(index) else {
                        self.to_client.push_back(message);
                        continue;
                    };
                    stage.server_to_client(message, &mut self.scratch);
                    index
                }
                Work::ToServer(0, request) => {
                    self.to_server.push_back(request);
                    continue;
                }
                Work::ToServer(index, request) => {
                    self.stages[index - 1].client_to_server(request, &mut self.scratch);
                    index - 1
                }
            };

            for message in self.scratch.to_client.drain(..) {
                work.push_back(Work::ToClient(stage_index + 1, message));
            }
            for request in self.scratch.to_server.drain(..) {
                work.push_back(Work::ToServer(stage_index, request));
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .field("to_client", &self.to_client)
            .field("to_server", &self.to_server)
            .finish()
    }
}

/// Keeps the per-subscription state of a stage for every `chainHead_v1_follow` subscription.
///
/// A subscription is tracked starting from the response to its `chainHead_v1_follow` request,
/// and until either a `stop` event or a `chainHead_v1_unfollow` request.
struct FollowSubscriptions<T> {
    /// Identifiers of the `chainHead_v1_follow` requests waiting for a response.
    follow_requests: hashbrown::HashSet<String, SipHasherBuild>,
    subscriptions: hashbrown::HashMap<String, T, SipHasherBuild>,
}

impl<T> FollowSubscriptions<T> {
    fn new(seeds: &mut SeedSource) -> Self {
        FollowSubscriptions {
            follow_requests: hashbrown::HashSet::with_capacity_and_hasher(2, seeds.hasher()),
            subscriptions: hashbrown::HashMap::with_capacity_and_hasher(2, seeds.hasher()),
        }
    }

    /// Must be called with every request that travels towards the server. Returns the
    /// subscription ID and its state if the request unsubscribes from a tracked subscription.
    fn inspect_request(&mut self, request: &ClientRequest) -> Option<(String, T)> {
        let method = methods::to_canonical(&request.method);
        if method == methods::names::CHAIN_HEAD_FOLLOW {
            self.follow_requests.insert(request.id.clone());
            None
        } else if method == methods::names::CHAIN_HEAD_UNFOLLOW {
            let subscription = subscription_param(request)?;
            self.subscriptions.remove_entry(subscription)
        } else {
            None
        }
    }

    /// Must be called with every message that travels towards the client. Starts tracking the
    /// subscription if the message is the response to a `chainHead_v1_follow` request.
    fn inspect_response(&mut self, message: &ServerToClient, init: impl FnOnce() -> T) {
        let ServerToClient::Response { id, outcome } = message else {
            return;
        };

        if !self.follow_requests.remove(&normalized_id(id)) {
            return;
        }

        if let Ok(serde_json::Value::String(subscription)) = outcome {
            self.subscriptions.insert(subscription.clone(), init());
        }
    }

    fn get_mut(&mut self, subscription: &str) -> Option<&mut T> {
        self.subscriptions.get_mut(subscription)
    }

    fn remove(&mut self, subscription: &str) -> Option<T> {
        self.subscriptions.remove(subscription)
    }
}

/// Stops `chainHead_v1_follow` subscriptions on behalf of the client, by generating a `stop`
/// event and a `chainHead_v1_unfollow` request.
struct Aborter {
    /// Prefix of the identifiers of the generated requests.
    id_prefix: &'static str,
    next_id: u64,
    /// Generated requests that haven't been answered yet, and the subscription they concern.
    unfollow_requests: hashbrown::HashMap<String, String, SipHasherBuild>,
}

impl Aborter {
    fn new(id_prefix: &'static str, seeds: &mut SeedSource) -> Self {
        Aborter {
            id_prefix,
            next_id: 0,
            unfollow_requests: hashbrown::HashMap::with_capacity_and_hasher(0, seeds.hasher()),
        }
    }

    /// Emits a `stop` event towards the client and a `chainHead_v1_unfollow` towards the server.
    fn abort(&mut self, subscription: &str, unfollow_method: &str, output: &mut StageOutput) {
        output.to_client(ServerToClient::FollowEvent {
            subscription: subscription.to_string(),
            event: methods::FollowEvent::Stop {},
        });

        let id = format!("{}-{}", self.id_prefix, self.next_id);
        self.next_id += 1;
        self.unfollow_requests
            .insert(id.clone(), subscription.to_string());

        output.to_server(ClientRequest {
            id,
            method: unfollow_method.to_string(),
            params: vec![serde_json::Value::String(subscription.to_string())],
        });
    }

    /// Returns `true` if the subscription has been aborted and its unfollow request hasn't been
    /// answered yet. Notifications concerning such a subscription must be discarded.
    fn is_aborted(&self, subscription: &str) -> bool {
        self.unfollow_requests.values().any(|s| s == subscription)
    }

    /// Returns `true` if the message is the response to a generated request. Such a response
    /// must be discarded.
    fn swallow_response(&mut self, message: &ServerToClient) -> bool {
        let ServerToClient::Response { id, .. } = message else {
            return false;
        };
        self.unfollow_requests.remove(&normalized_id(id)).is_some()
    }
}

fn normalized_id(id: &WireId) -> String {
    match id {
        WireId::Str(s) => s.clone(),
        WireId::Num(n) => n.to_string(),
    }
}

/// Returns the first parameter of the request if it is a string.
fn subscription_param(request: &ClientRequest) -> Option<&str> {
    request.params.first()?.as_str()
}
