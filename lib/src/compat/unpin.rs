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

//! Keeps track of the blocks that are pinned on the server side, in order to never send a
//! `chainHead_v1_unpin` request containing a block that isn't pinned. Servers are allowed to
//! stop the subscription when this happens.
//!
//! The block hashes of outgoing `chainHead_v1_unpin` requests are filtered. If no block is
//! left, the request is answered locally and isn't sent to the server.
//!
//! Some clients pass a single string as the list of hashes. Such requests are turned into a
//! list.

use super::{FollowSubscriptions, Stage, StageOutput};
use crate::{
    json_rpc::{methods, ClientRequest, ServerToClient, WireId},
    util::SeedSource,
};

use alloc::vec::Vec;
use serde_json::Value;

/// See [the module-level documentation](..).
pub struct Unpin {
    subscriptions: FollowSubscriptions<Subscription>,
}

#[derive(Default)]
struct Subscription {
    /// Blocks that are pinned on the server side.
    pinned: hashbrown::HashSet<[u8; 32], fnv::FnvBuildHasher>,
}

impl Unpin {
    pub fn new(seeds: &mut SeedSource) -> Self {
        Unpin {
            subscriptions: FollowSubscriptions::new(seeds),
        }
    }

    /// Returns the number of blocks pinned on the server side for the given subscription, or
    /// `None` if the subscription isn't known.
    pub fn num_pinned(&mut self, subscription_id: &str) -> Option<usize> {
        self.subscriptions
            .get_mut(subscription_id)
            .map(|s| s.pinned.len())
    }
}

impl Stage for Unpin {
    fn server_to_client(&mut self, message: ServerToClient, output: &mut StageOutput) {
        self.subscriptions
            .inspect_response(&message, Subscription::default);

        if let ServerToClient::FollowEvent {
            subscription: subscription_id,
            event,
        } = &message
        {
            if let methods::FollowEvent::Stop {} = event {
                self.subscriptions.remove(subscription_id);
            } else if let Some(subscription) = self.subscriptions.get_mut(subscription_id) {
                match event {
                    methods::FollowEvent::Initialized {
                        finalized_block_hashes,
                        ..
                    } => subscription
                        .pinned
                        .extend(finalized_block_hashes.iter().map(|h| h.0)),
                    methods::FollowEvent::NewBlock { block_hash, .. } => {
                        subscription.pinned.insert(block_hash.0);
                    }
                    _ => {}
                }
            }
        }

        output.to_client(message);
    }

    fn client_to_server(&mut self, mut request: ClientRequest, output: &mut StageOutput) {
        if self.subscriptions.inspect_request(&request).is_some()
            || methods::to_canonical(&request.method) != methods::names::CHAIN_HEAD_UNPIN
        {
            output.to_server(request);
            return;
        }

        if let Some(hash @ Value::String(_)) = request.params.get_mut(1) {
            *hash = Value::Array(Vec::from([hash.take()]));
        }

        let subscription = request
            .params
            .first()
            .and_then(|s| s.as_str())
            .and_then(|s| self.subscriptions.get_mut(s));

        let (Some(subscription), Some(Value::Array(hashes))) =
            (subscription, request.params.get_mut(1))
        else {
            output.to_server(request);
            return;
        };

        hashes.retain(|hash| {
            match hash.as_str().and_then(methods::HashHexString::parse) {
                Some(hash) => subscription.pinned.remove(&hash.0),
                // Let the server report the error.
                None => true,
            }
        });

        if hashes.is_empty() {
            output.to_client(ServerToClient::Response {
                id: WireId::Str(request.id),
                outcome: Ok(Value::Null),
            });
        } else {
            output.to_server(request);
        }
    }
}
