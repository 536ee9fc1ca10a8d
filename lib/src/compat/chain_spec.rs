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

//! Older servers don't support the `chainSpec_v1_*` functions. When such a function returns a
//! "method not found" error, this stage calls its legacy equivalent and answers the original
//! request with the result:
//!
//! | Function                    | Legacy equivalent         |
//! |-----------------------------|---------------------------|
//! | `chainSpec_v1_chainName`    | `system_chain`            |
//! | `chainSpec_v1_genesisHash`  | `chain_getBlockHash(0)`   |
//! | `chainSpec_v1_properties`   | `system_properties`       |
//!
//! The results are also normalized: a `null` properties object becomes an empty object, and
//! the genesis hash is turned into lowercase hexadecimal.

use super::{normalized_id, Stage, StageOutput};
use crate::{
    json_rpc::{methods, ClientRequest, RpcError, ServerToClient, WireId},
    util::{canonical_hex, SeedSource, SipHasherBuild},
};

use alloc::{format, string::String, vec, vec::Vec};
use serde_json::Value;

/// See [the module-level documentation](..).
pub struct ChainSpec {
    /// `chainSpec_v1_*` requests waiting for a response.
    requests: hashbrown::HashMap<String, Kind, SipHasherBuild>,

    /// Legacy requests waiting for a response, and the identifier of the original request.
    fallbacks: hashbrown::HashMap<String, (String, Kind), SipHasherBuild>,

    next_fallback_id: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Kind {
    ChainName,
    GenesisHash,
    Properties,
}

impl Kind {
    fn from_method(method: &str) -> Option<Self> {
        let method = methods::to_canonical(method);
        if method == methods::names::CHAIN_SPEC_CHAIN_NAME {
            Some(Kind::ChainName)
        } else if method == methods::names::CHAIN_SPEC_GENESIS_HASH {
            Some(Kind::GenesisHash)
        } else if method == methods::names::CHAIN_SPEC_PROPERTIES {
            Some(Kind::Properties)
        } else {
            None
        }
    }

    fn legacy_request(&self) -> (&'static str, Vec<Value>) {
        match self {
            Kind::ChainName => (methods::names::LEGACY_SYSTEM_CHAIN, Vec::new()),
            Kind::GenesisHash => (
                methods::names::LEGACY_CHAIN_GET_BLOCK_HASH,
                vec![Value::from(0)],
            ),
            Kind::Properties => (methods::names::LEGACY_SYSTEM_PROPERTIES, Vec::new()),
        }
    }

    fn normalize(&self, value: Value) -> Value {
        match (self, value) {
            (Kind::Properties, Value::Null) => Value::Object(Default::default()),
            (Kind::GenesisHash, Value::String(hash)) => {
                Value::String(canonical_hex(&hash).unwrap_or(hash))
            }
            (_, value) => value,
        }
    }
}

impl ChainSpec {
    pub fn new(seeds: &mut SeedSource) -> Self {
        ChainSpec {
            requests: hashbrown::HashMap::with_capacity_and_hasher(0, seeds.hasher()),
            fallbacks: hashbrown::HashMap::with_capacity_and_hasher(0, seeds.hasher()),
            next_fallback_id: 0,
        }
    }
}

impl Stage for ChainSpec {
    fn server_to_client(&mut self, message: ServerToClient, output: &mut StageOutput) {
        let ServerToClient::Response { id, outcome } = message else {
            output.to_client(message);
            return;
        };

        let id = normalized_id(&id);

        if let Some((original_id, kind)) = self.fallbacks.remove(&id) {
            output.to_client(ServerToClient::Response {
                id: WireId::Str(original_id),
                outcome: outcome.map(|value| kind.normalize(value)),
            });
            return;
        }

        let Some(kind) = self.requests.remove(&id) else {
            output.to_client(ServerToClient::Response {
                id: WireId::Str(id),
                outcome,
            });
            return;
        };

        match outcome {
            Err(RpcError { code, .. }) if code == RpcError::METHOD_NOT_FOUND => {
                let fallback_id = format!("compat-chainspec-{}", self.next_fallback_id);
                self.next_fallback_id += 1;

                let (method, params) = kind.legacy_request();
                self.fallbacks.insert(fallback_id.clone(), (id, kind));
                output.to_server(ClientRequest {
                    id: fallback_id,
                    method: String::from(method),
                    params,
                });
            }
            outcome => output.to_client(ServerToClient::Response {
                id: WireId::Str(id),
                outcome: outcome.map(|value| kind.normalize(value)),
            }),
        }
    }

    fn client_to_server(&mut self, request: ClientRequest, output: &mut StageOutput) {
        if let Some(kind) = Kind::from_method(&request.method) {
            self.requests.insert(request.id.clone(), kind);
        }

        output.to_server(request);
    }
}
