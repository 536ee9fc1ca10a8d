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

//! Converts between the canonical and the legacy names of the JSON-RPC functions, and decodes
//! `chainHead_v1_followEvent` notifications.
//!
//! Notifications are always renamed to their canonical name. Requests are renamed to their
//! legacy name only if the stage has been configured for a legacy server.
//!
//! Follow events are decoded into [`ServerToClient::FollowEvent`]. Some older servers use a
//! slightly different format, which is accepted as well:
//!
//! - `initialized` and `finalized` events with a single `finalizedBlockHash` field instead of a
//! `finalizedBlockHashes` list.
//! - `finalized` events with a `finalizedBlocksHashes` field.
//! - runtimes without a `type` field.
//! - runtimes whose `apis` field is a list of `[name, version]` pairs instead of an object.
//!
//! Events with an unknown name are discarded. Known events that can't be decoded stop the
//! subscription, as it isn't possible to track the state of the chain anymore.

use super::{Aborter, Stage, StageOutput};
use crate::{
    json_rpc::{methods, ClientRequest, ServerToClient},
    util::SeedSource,
};

use alloc::{borrow::Cow, string::String, vec};
use serde_json::{Map, Value};

/// See [the module-level documentation](..).
pub struct Translate {
    legacy_method_names: bool,
    aborter: Aborter,
}

impl Translate {
    pub fn new(legacy_method_names: bool, seeds: &mut SeedSource) -> Self {
        Translate {
            legacy_method_names,
            aborter: Aborter::new("compat-translate-unfollow", seeds),
        }
    }

    fn outgoing_name<'a>(&self, method: &'a str) -> Cow<'a, str> {
        if self.legacy_method_names {
            methods::to_legacy(method)
        } else {
            Cow::Borrowed(method)
        }
    }
}

impl Stage for Translate {
    fn server_to_client(&mut self, message: ServerToClient, output: &mut StageOutput) {
        if self.aborter.swallow_response(&message) {
            return;
        }

        let ServerToClient::Notification {
            method,
            subscription,
            result,
        } = message
        else {
            output.to_client(message);
            return;
        };

        let method = methods::to_canonical(&method).into_owned();
        if method != methods::names::CHAIN_HEAD_FOLLOW_EVENT {
            output.to_client(ServerToClient::Notification {
                method,
                subscription,
                result,
            });
            return;
        }

        let subscription = subscription.into_normalized();
        if self.aborter.is_aborted(&subscription) {
            return;
        }

        match decode_follow_event(result) {
            Ok(Some(event)) => output.to_client(ServerToClient::FollowEvent {
                subscription,
                event,
            }),
            Ok(None) => {}
            Err(MalformedFollowEvent) => {
                let unfollow = self.outgoing_name(methods::names::CHAIN_HEAD_UNFOLLOW);
                self.aborter.abort(&subscription, &unfollow, output);
            }
        }
    }

    fn client_to_server(&mut self, mut request: ClientRequest, output: &mut StageOutput) {
        let canonical = methods::to_canonical(&request.method).into_owned();
        request.method = self.outgoing_name(&canonical).into_owned();
        output.to_server(request);
    }
}

/// Decodes the `result` field of a `chainHead_v1_followEvent` notification.
///
/// Returns `Ok(None)` if the event has an unknown name.
pub fn decode_follow_event(
    mut result: Value,
) -> Result<Option<methods::FollowEvent>, MalformedFollowEvent> {
    let Some(fields) = result.as_object_mut() else {
        return Err(MalformedFollowEvent);
    };

    let event_name = match fields.get("event").and_then(|e| e.as_str()) {
        Some(name) => String::from(name),
        None => return Err(MalformedFollowEvent),
    };

    if !methods::FollowEvent::KNOWN_EVENT_NAMES.contains(&&*event_name) {
        return Ok(None);
    }

    match &*event_name {
        "initialized" => {
            singular_to_list(fields, "finalizedBlockHash", "finalizedBlockHashes");
            fix_runtime_field(fields, "finalizedBlockRuntime");
        }
        "finalized" => {
            rename(fields, "finalizedBlocksHashes", "finalizedBlockHashes");
            singular_to_list(fields, "finalizedBlockHash", "finalizedBlockHashes");
        }
        "newBlock" => fix_runtime_field(fields, "newRuntime"),
        _ => {}
    }

    serde_json::from_value(result)
        .map(Some)
        .map_err(|_| MalformedFollowEvent)
}

/// Follow event that has a known name but an invalid format.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Malformed follow event")]
pub struct MalformedFollowEvent;

fn rename(fields: &mut Map<String, Value>, legacy: &str, canonical: &str) {
    if fields.contains_key(canonical) {
        return;
    }
    if let Some(value) = fields.remove(legacy) {
        fields.insert(canonical.into(), value);
    }
}

fn singular_to_list(fields: &mut Map<String, Value>, legacy: &str, canonical: &str) {
    if fields.contains_key(canonical) {
        return;
    }
    if let Some(value) = fields.remove(legacy) {
        fields.insert(canonical.into(), Value::Array(vec![value]));
    }
}

fn fix_runtime_field(fields: &mut Map<String, Value>, name: &str) {
    if fields.get(name).is_some_and(|v| v.is_null()) {
        fields.remove(name);
        return;
    }

    if let Some(Value::Object(runtime)) = fields.get_mut(name) {
        fix_runtime(runtime);
    }
}

fn fix_runtime(runtime: &mut Map<String, Value>) {
    if !runtime.contains_key("type") {
        let ty = if runtime.contains_key("spec") {
            "valid"
        } else {
            "invalid"
        };
        runtime.insert("type".into(), Value::String(ty.into()));
    }

    let Some(Value::Object(spec)) = runtime.get_mut("spec") else {
        return;
    };

    let apis_as_object = match spec.get("apis") {
        Some(Value::Array(apis)) => {
            let mut as_object = Map::with_capacity(apis.len());
            for api in apis {
                if let Some([Value::String(name), version]) = api.as_array().map(|a| &a[..]) {
                    as_object.insert(name.clone(), version.clone());
                }
            }
            as_object
        }
        _ => return,
    };

    spec.insert("apis".into(), Value::Object(apis_as_object));
}
