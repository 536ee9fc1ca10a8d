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

//! Normalizes the return value of `chainHead_v1_storage`.
//!
//! Servers disagree on the format of the lists of items. This stage accepts:
//!
//! - a list of `{ key, value }` objects, where `value` might be named `hash` or
//! `closestDescendantMerkleValue` depending on the type of query;
//! - a list of `[key, value]` pairs;
//! - an object mapping keys to values.
//!
//! and turns all of them into a list of `{ key, value }` objects. Some servers also return a
//! single flat list instead of one list per type of query, in which case the items are
//! attributed to a type of query based on the items of the request.
//!
//! Keys and values are normalized to lowercase `0x`-prefixed hexadecimal strings.

use super::{normalized_id, Stage, StageOutput};
use crate::{
    json_rpc::{methods, ClientRequest, ServerToClient},
    util::{canonical_hex, SeedSource, SipHasherBuild},
};

use alloc::{string::String, vec::Vec};
use serde_json::{Map, Value};

/// See [the module-level documentation](..).
pub struct Descendants {
    /// `chainHead_v1_storage` requests waiting for a response, and the items they query.
    storage_requests: hashbrown::HashMap<String, Vec<methods::StorageQueryItem>, SipHasherBuild>,
}

impl Descendants {
    pub fn new(seeds: &mut SeedSource) -> Self {
        Descendants {
            storage_requests: hashbrown::HashMap::with_capacity_and_hasher(4, seeds.hasher()),
        }
    }
}

impl Stage for Descendants {
    fn server_to_client(&mut self, message: ServerToClient, output: &mut StageOutput) {
        let ServerToClient::Response { id, outcome } = message else {
            output.to_client(message);
            return;
        };

        let outcome = match self.storage_requests.remove(&normalized_id(&id)) {
            Some(items) => outcome.map(|value| normalize_storage_result(value, &items)),
            None => outcome,
        };

        output.to_client(ServerToClient::Response { id, outcome });
    }

    fn client_to_server(&mut self, request: ClientRequest, output: &mut StageOutput) {
        if methods::to_canonical(&request.method) == methods::names::CHAIN_HEAD_STORAGE {
            let items = request
                .params
                .get(2)
                .and_then(|items| {
                    serde_json::from_value::<Vec<methods::StorageQueryItem>>(items.clone()).ok()
                })
                .unwrap_or_default();
            self.storage_requests.insert(request.id.clone(), items);
        }

        output.to_server(request);
    }
}

const QUERY_TYPES: [methods::StorageQueryType; 5] = [
    methods::StorageQueryType::Value,
    methods::StorageQueryType::Hash,
    methods::StorageQueryType::ClosestDescendantMerkleValue,
    methods::StorageQueryType::DescendantsValues,
    methods::StorageQueryType::DescendantsHashes,
];

/// Turns the return value of `chainHead_v1_storage` into the canonical
/// [`methods::StorageResult`] format.
///
/// `null`, and objects that contain none of the lists (such as the `started` or
/// `limitReached` replies of some servers), are left untouched.
pub fn normalize_storage_result(value: Value, items: &[methods::StorageQueryItem]) -> Value {
    let mut lists = match value {
        Value::Null => return Value::Null,
        Value::Array(flat) => classify_flat(flat, items),
        Value::Object(fields)
            if !QUERY_TYPES
                .iter()
                .any(|ty| fields.contains_key(ty.result_field())) =>
        {
            return Value::Object(fields)
        }
        Value::Object(mut fields) => QUERY_TYPES
            .iter()
            .map(|ty| {
                let name = ty.result_field();
                (name, normalize_list(fields.remove(name)))
            })
            .collect::<Vec<_>>(),
        other => return other,
    };

    let mut out = Map::with_capacity(QUERY_TYPES.len());
    for (name, list) in lists.drain(..) {
        out.insert(String::from(name), Value::Array(list));
    }
    Value::Object(out)
}

fn normalize_list(list: Option<Value>) -> Vec<Value> {
    match list {
        Some(Value::Array(entries)) => entries.into_iter().filter_map(normalize_item).collect(),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| item(&key, value))
            .collect(),
        _ => Vec::new(),
    }
}

/// Normalizes one item of a list. Returns `None` if the item has an unknown format.
fn normalize_item(entry: Value) -> Option<Value> {
    match entry {
        Value::Array(pair) => {
            let mut pair = pair.into_iter();
            let key = pair.next()?;
            let value = pair.next()?;
            Some(item(key.as_str()?, value))
        }
        Value::Object(mut fields) => {
            let key = fields.remove("key")?;
            let value = fields
                .remove("value")
                .or_else(|| fields.remove("hash"))
                .or_else(|| fields.remove("closestDescendantMerkleValue"))?;
            Some(item(key.as_str()?, value))
        }
        _ => None,
    }
}

fn item(key: &str, value: Value) -> Value {
    let key = canonical_hex(key).unwrap_or_else(|| String::from(key));
    let value = match value {
        Value::String(v) => Value::String(canonical_hex(&v).unwrap_or(v)),
        other => other,
    };

    let mut fields = Map::with_capacity(2);
    fields.insert(String::from("key"), Value::String(key));
    fields.insert(String::from("value"), value);
    Value::Object(fields)
}

/// Attributes each item of a flat list to the list of one type of query.
fn classify_flat(
    flat: Vec<Value>,
    items: &[methods::StorageQueryItem],
) -> Vec<(&'static str, Vec<Value>)> {
    let mut lists = QUERY_TYPES
        .iter()
        .map(|ty| (ty.result_field(), Vec::new()))
        .collect::<Vec<_>>();

    for entry in flat {
        let hint = match &entry {
            Value::Object(fields) if fields.contains_key("hash") => {
                Some(methods::StorageQueryType::Hash)
            }
            Value::Object(fields) if fields.contains_key("closestDescendantMerkleValue") => {
                Some(methods::StorageQueryType::ClosestDescendantMerkleValue)
            }
            _ => None,
        };

        let Some(normalized) = normalize_item(entry) else {
            continue;
        };

        let key = normalized
            .get("key")
            .and_then(|k| k.as_str())
            .and_then(|k| hex::decode(k.trim_start_matches("0x")).ok())
            .unwrap_or_default();

        let ty = query_type_of(&key, hint, items);
        let index = QUERY_TYPES.iter().position(|t| *t == ty).unwrap_or(0);
        lists[index].1.push(normalized);
    }

    lists
}

/// Finds which query of the request an item of a flat list answers.
///
/// `hint` is the type deduced from the name of the value field of the item, if any.
fn query_type_of(
    key: &[u8],
    hint: Option<methods::StorageQueryType>,
    items: &[methods::StorageQueryItem],
) -> methods::StorageQueryType {
    use methods::StorageQueryType as Ty;

    let exact = |ty: Ty| items.iter().any(|i| i.ty == ty && i.key.0 == key);
    let descendant = |ty: Ty| items.iter().any(|i| i.ty == ty && key.starts_with(&i.key.0));

    match hint {
        Some(Ty::Hash) if !exact(Ty::Hash) && descendant(Ty::DescendantsHashes) => {
            Ty::DescendantsHashes
        }
        Some(hint) => hint,
        None => [Ty::Value, Ty::Hash, Ty::ClosestDescendantMerkleValue]
            .into_iter()
            .find(|ty| exact(*ty))
            .or_else(|| {
                [Ty::DescendantsValues, Ty::DescendantsHashes]
                    .into_iter()
                    .find(|ty| descendant(*ty))
            })
            .unwrap_or(Ty::Value),
    }
}
