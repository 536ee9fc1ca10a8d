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

//! Some servers use numbers as subscription identifiers, and some servers answer with a
//! numeric `id` even though the request was sent with a string `id`.
//!
//! On the server-to-client path, this stage turns every numeric identifier into its decimal
//! string representation. On the client-to-server path, the subscription identifiers that were
//! originally numbers are turned back into numbers, as the server might not recognize them
//! otherwise.

use super::{normalized_id, Stage, StageOutput};
use crate::{
    json_rpc::{methods, ClientRequest, ServerToClient, WireId},
    util::{SeedSource, SipHasherBuild},
};

use alloc::string::{String, ToString as _};

/// See [the module-level documentation](..).
pub struct NumericIds {
    /// Identifiers of the requests that start a subscription and that haven't been answered.
    subscribe_requests: hashbrown::HashSet<String, SipHasherBuild>,

    /// Subscriptions whose identifier was provided by the server as a number, in their string
    /// form.
    numeric_subscriptions: hashbrown::HashSet<String, SipHasherBuild>,
}

impl NumericIds {
    pub fn new(seeds: &mut SeedSource) -> Self {
        NumericIds {
            subscribe_requests: hashbrown::HashSet::with_capacity_and_hasher(4, seeds.hasher()),
            numeric_subscriptions: hashbrown::HashSet::with_capacity_and_hasher(
                4,
                seeds.hasher(),
            ),
        }
    }

    /// Returns `true` if the server has provided this subscription ID as a number.
    pub fn is_numeric(&self, subscription: &str) -> bool {
        self.numeric_subscriptions.contains(subscription)
    }
}

impl Stage for NumericIds {
    fn server_to_client(&mut self, message: ServerToClient, output: &mut StageOutput) {
        match message {
            ServerToClient::Response { id, mut outcome } => {
                let id = normalized_id(&id);

                if self.subscribe_requests.remove(&id) {
                    if let Ok(serde_json::Value::Number(num)) = &outcome {
                        if let Some(num) = num.as_u64() {
                            let as_string = num.to_string();
                            self.numeric_subscriptions.insert(as_string.clone());
                            outcome = Ok(serde_json::Value::String(as_string));
                        }
                    }
                }

                output.to_client(ServerToClient::Response {
                    id: WireId::Str(id),
                    outcome,
                });
            }
            ServerToClient::Notification {
                method,
                subscription,
                result,
            } => {
                let subscription = subscription.into_normalized();

                // `stop` is the last event of a follow subscription.
                if methods::to_canonical(&method) == methods::names::CHAIN_HEAD_FOLLOW_EVENT
                    && result.get("event").and_then(|e| e.as_str()) == Some("stop")
                {
                    self.numeric_subscriptions.remove(&subscription);
                }

                output.to_client(ServerToClient::Notification {
                    method,
                    subscription: WireId::Str(subscription),
                    result,
                });
            }
            message @ (ServerToClient::UnattributedError(_)
            | ServerToClient::FollowEvent { .. }) => output.to_client(message),
        }
    }

    fn client_to_server(&mut self, mut request: ClientRequest, output: &mut StageOutput) {
        if methods::is_subscribe(&request.method) {
            self.subscribe_requests.insert(request.id.clone());
        }

        if methods::targets_subscription(&request.method) {
            if let Some(param) = request.params.first_mut() {
                let numeric = param
                    .as_str()
                    .filter(|s| self.numeric_subscriptions.contains(*s))
                    .and_then(|s| s.parse::<u64>().ok());

                if let Some(numeric) = numeric {
                    if methods::is_unsubscribe(&request.method) {
                        self.numeric_subscriptions.remove(&numeric.to_string());
                    }
                    *param = serde_json::Value::Number(numeric.into());
                }
            }
        }

        output.to_server(request);
    }
}
