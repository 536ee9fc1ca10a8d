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

//! Names of the JSON-RPC functions and types of their parameters, return values, and
//! notifications.
//!
//! The names found in [`names`] are the canonical names. Some servers only support older
//! versions of these functions, named `*_unstable_*`. Use [`to_canonical`] and [`to_legacy`] to
//! convert between the two.

use alloc::{
    borrow::Cow,
    collections::BTreeMap,
    format,
    string::{String, ToString as _},
    vec::Vec,
};
use core::fmt;

/// Canonical names of the JSON-RPC functions and notifications.
pub mod names {
    pub const CHAIN_HEAD_FOLLOW: &str = "chainHead_v1_follow";
    pub const CHAIN_HEAD_FOLLOW_EVENT: &str = "chainHead_v1_followEvent";
    pub const CHAIN_HEAD_BODY: &str = "chainHead_v1_body";
    pub const CHAIN_HEAD_CALL: &str = "chainHead_v1_call";
    pub const CHAIN_HEAD_STORAGE: &str = "chainHead_v1_storage";
    pub const CHAIN_HEAD_HEADER: &str = "chainHead_v1_header";
    pub const CHAIN_HEAD_UNPIN: &str = "chainHead_v1_unpin";
    pub const CHAIN_HEAD_UNFOLLOW: &str = "chainHead_v1_unfollow";

    pub const TRANSACTION_SUBMIT_AND_WATCH: &str = "transactionWatch_v1_submitAndWatch";
    pub const TRANSACTION_WATCH_EVENT: &str = "transactionWatch_v1_watchEvent";
    pub const TRANSACTION_UNWATCH: &str = "transactionWatch_v1_unwatch";

    pub const CHAIN_SPEC_CHAIN_NAME: &str = "chainSpec_v1_chainName";
    pub const CHAIN_SPEC_GENESIS_HASH: &str = "chainSpec_v1_genesisHash";
    pub const CHAIN_SPEC_PROPERTIES: &str = "chainSpec_v1_properties";

    pub const LEGACY_SYSTEM_CHAIN: &str = "system_chain";
    pub const LEGACY_CHAIN_GET_BLOCK_HASH: &str = "chain_getBlockHash";
    pub const LEGACY_SYSTEM_PROPERTIES: &str = "system_properties";
}

/// List of `(canonical prefix, legacy prefix)`.
const PREFIXES: &[(&str, &str)] = &[
    ("chainHead_v1_", "chainHead_unstable_"),
    ("transactionWatch_v1_", "transactionWatch_unstable_"),
    ("chainSpec_v1_", "chainSpec_unstable_"),
];

/// Converts the name of a method or notification into its canonical form.
///
/// Names that are already canonical or that are unknown are returned unchanged.
pub fn to_canonical(name: &str) -> Cow<'_, str> {
    // Some old servers use `transaction_unstable_*` rather than `transactionWatch_unstable_*`.
    if let Some(rest) = name.strip_prefix("transaction_unstable_") {
        return Cow::Owned(format!("transactionWatch_v1_{rest}"));
    }

    for (canonical, legacy) in PREFIXES {
        if let Some(rest) = name.strip_prefix(legacy) {
            return Cow::Owned(format!("{canonical}{rest}"));
        }
    }

    Cow::Borrowed(name)
}

/// Converts the canonical name of a method into the name used by servers that only support the
/// `unstable` version of the JSON-RPC API.
pub fn to_legacy(name: &str) -> Cow<'_, str> {
    for (canonical, legacy) in PREFIXES {
        if let Some(rest) = name.strip_prefix(canonical) {
            return Cow::Owned(format!("{legacy}{rest}"));
        }
    }

    Cow::Borrowed(name)
}

/// Returns `true` if calling the given method (canonical or legacy name) starts a subscription.
pub fn is_subscribe(method: &str) -> bool {
    let method = to_canonical(method);
    method == names::CHAIN_HEAD_FOLLOW || method == names::TRANSACTION_SUBMIT_AND_WATCH
}

/// Returns `true` if calling the given method (canonical or legacy name) ends a subscription.
pub fn is_unsubscribe(method: &str) -> bool {
    let method = to_canonical(method);
    method == names::CHAIN_HEAD_UNFOLLOW || method == names::TRANSACTION_UNWATCH
}

/// Returns `true` if the first parameter of the given method (canonical or legacy name) is the
/// identifier of a subscription.
pub fn targets_subscription(method: &str) -> bool {
    let method = to_canonical(method);
    (method.starts_with("chainHead_v1_") && method != names::CHAIN_HEAD_FOLLOW)
        || method == names::TRANSACTION_UNWATCH
}

/// Hexadecimal string, prefixed with `0x`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexString(pub Vec<u8>);

impl serde::Serialize for HexString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("0x{}", hex::encode(&self.0[..])).serialize(serializer)
    }
}

impl<'a> serde::Deserialize<'a> for HexString {
    fn deserialize<D>(deserializer: D) -> Result<HexString, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let string = <Cow<'a, str>>::deserialize(deserializer)?;

        if string.is_empty() {
            return Ok(HexString(Vec::new()));
        }

        if !string.starts_with("0x") {
            return Err(serde::de::Error::custom(
                "hexadecimal string doesn't start with 0x",
            ));
        }

        let bytes = hex::decode(&string[2..]).map_err(serde::de::Error::custom)?;
        Ok(HexString(bytes))
    }
}

impl fmt::Display for HexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..]))
    }
}

/// Hash of a block, encoded as a `0x`-prefixed hexadecimal string.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashHexString(pub [u8; 32]);

impl HashHexString {
    /// Parses a `0x`-prefixed hexadecimal string. Uppercase digits are accepted.
    pub fn parse(input: &str) -> Option<Self> {
        let digits = input.strip_prefix("0x")?;
        let mut out = [0; 32];
        hex::decode_to_slice(digits, &mut out).ok()?;
        Some(HashHexString(out))
    }
}

impl serde::Serialize for HashHexString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'a> serde::Deserialize<'a> for HashHexString {
    fn deserialize<D>(deserializer: D) -> Result<HashHexString, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let string = <Cow<'a, str>>::deserialize(deserializer)?;
        HashHexString::parse(&string)
            .ok_or_else(|| serde::de::Error::custom("invalid 32 bytes hexadecimal hash"))
    }
}

impl fmt::Display for HashHexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..]))
    }
}

/// Event generated by a `chainHead_v1_follow` subscription.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event")]
pub enum FollowEvent {
    #[serde(rename = "initialized")]
    Initialized {
        #[serde(rename = "finalizedBlockHashes")]
        finalized_block_hashes: Vec<HashHexString>,
        #[serde(
            rename = "finalizedBlockRuntime",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        finalized_block_runtime: Option<MaybeRuntimeSpec>,
    },
    #[serde(rename = "newBlock")]
    NewBlock {
        #[serde(rename = "blockHash")]
        block_hash: HashHexString,
        #[serde(rename = "parentBlockHash")]
        parent_block_hash: HashHexString,
        #[serde(rename = "newRuntime", default, skip_serializing_if = "Option::is_none")]
        new_runtime: Option<MaybeRuntimeSpec>,
    },
    #[serde(rename = "bestBlockChanged")]
    BestBlockChanged {
        #[serde(rename = "bestBlockHash")]
        best_block_hash: HashHexString,
    },
    #[serde(rename = "finalized")]
    Finalized {
        #[serde(rename = "finalizedBlockHashes")]
        finalized_block_hashes: Vec<HashHexString>,
        #[serde(rename = "prunedBlockHashes", default)]
        pruned_block_hashes: Vec<HashHexString>,
    },
    #[serde(rename = "stop")]
    Stop {},
}

impl FollowEvent {
    /// Names of the `event` field that [`FollowEvent`] can decode.
    pub const KNOWN_EVENT_NAMES: &'static [&'static str] = &[
        "initialized",
        "newBlock",
        "bestBlockChanged",
        "finalized",
        "stop",
    ];
}

/// Runtime of a block, as reported in a [`FollowEvent`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum MaybeRuntimeSpec {
    #[serde(rename = "valid")]
    Valid { spec: RuntimeSpec },
    #[serde(rename = "invalid")]
    Invalid { error: String },
}

/// Specification of a runtime.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeSpec {
    #[serde(rename = "specName")]
    pub spec_name: String,
    #[serde(rename = "implName")]
    pub impl_name: String,
    #[serde(rename = "specVersion")]
    pub spec_version: u32,
    #[serde(rename = "implVersion")]
    pub impl_version: u32,
    #[serde(
        rename = "transactionVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_version: Option<u32>,
    /// Keys are the `0x`-prefixed hexadecimal names of the APIs, and values are their versions.
    #[serde(default)]
    pub apis: BTreeMap<String, u32>,
}

/// Item of the list of storage queries passed to `chainHead_v1_storage`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StorageQueryItem {
    pub key: HexString,
    #[serde(rename = "type")]
    pub ty: StorageQueryType,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StorageQueryType {
    #[serde(rename = "value")]
    Value,
    #[serde(rename = "hash")]
    Hash,
    #[serde(rename = "closestDescendantMerkleValue")]
    ClosestDescendantMerkleValue,
    #[serde(rename = "descendantsValues")]
    DescendantsValues,
    #[serde(rename = "descendantsHashes")]
    DescendantsHashes,
}

impl StorageQueryType {
    /// Name of the field of [`StorageResult`] where the results of this query type are found.
    pub fn result_field(&self) -> &'static str {
        match self {
            StorageQueryType::Value => "values",
            StorageQueryType::Hash => "hashes",
            StorageQueryType::ClosestDescendantMerkleValue => "closests",
            StorageQueryType::DescendantsValues => "descendantsValues",
            StorageQueryType::DescendantsHashes => "descendantsHashes",
        }
    }
}

/// Return value of `chainHead_v1_storage`.
///
/// For each list, `value` contains respectively the value, the hash of the value, or the
/// closest descendant Merkle value.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageResult {
    #[serde(default)]
    pub values: Vec<StorageResultItem>,
    #[serde(default)]
    pub hashes: Vec<StorageResultItem>,
    #[serde(default)]
    pub closests: Vec<StorageResultItem>,
    #[serde(rename = "descendantsValues", default)]
    pub descendants_values: Vec<StorageResultItem>,
    #[serde(rename = "descendantsHashes", default)]
    pub descendants_hashes: Vec<StorageResultItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StorageResultItem {
    pub key: HexString,
    pub value: HexString,
}

/// Event generated by a `transactionWatch_v1_submitAndWatch` subscription.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event")]
pub enum TransactionWatchEvent {
    #[serde(rename = "validated")]
    Validated {},
    #[serde(rename = "broadcasted")]
    Broadcasted {
        #[serde(rename = "numPeers", default, skip_serializing_if = "Option::is_none")]
        num_peers: Option<u32>,
    },
    #[serde(rename = "bestChainBlockIncluded")]
    BestChainBlockIncluded {
        #[serde(default)]
        block: Option<TransactionWatchEventBlock>,
    },
    #[serde(rename = "finalized")]
    Finalized { block: TransactionWatchEventBlock },
    #[serde(rename = "error")]
    Error { error: String },
    #[serde(rename = "invalid")]
    Invalid { error: String },
    #[serde(rename = "dropped")]
    Dropped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        broadcasted: Option<bool>,
        error: String,
    },
}

/// Block in which a transaction has been included.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransactionWatchEventBlock {
    pub hash: HashHexString,
    /// Index of the transaction within the body of the block.
    ///
    /// Older servers encode this index as a string.
    #[serde(deserialize_with = "deserialize_number_or_string")]
    pub index: u64,
}

fn deserialize_number_or_string<'a, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'a>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum NumberOrString<'a> {
        Number(u64),
        String(Cow<'a, str>),
    }

    match <NumberOrString<'a> as serde::Deserialize>::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
