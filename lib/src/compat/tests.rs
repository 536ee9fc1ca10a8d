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

use super::{numeric_ids::NumericIds, unpin::Unpin, Config, Pipeline, Stage as _, StageOutput};
use crate::json_rpc::{
    methods::{FollowEvent, HashHexString, MaybeRuntimeSpec},
    ClientRequest, RpcError, ServerToClient, WireId,
};
use crate::util::SeedSource;

use serde_json::json;

fn pipeline() -> Pipeline {
    pipeline_with(Config {
        legacy_method_names: false,
        max_buffered_events: 16,
        randomness_seed: [0; 32],
    })
}

fn pipeline_with(config: Config) -> Pipeline {
    Pipeline::new(config)
}

fn hash(n: u8) -> String {
    format!("0x{}", hex::encode([n; 32]))
}

fn request(id: &str, method: &str, params: Vec<serde_json::Value>) -> ClientRequest {
    ClientRequest {
        id: id.into(),
        method: method.into(),
        params,
    }
}

fn follow_event(subscription: &str, result: serde_json::Value) -> ServerToClient {
    ServerToClient::Notification {
        method: "chainHead_v1_followEvent".into(),
        subscription: WireId::Str(subscription.into()),
        result,
    }
}

fn initialized(block: u8) -> serde_json::Value {
    json!({"event": "initialized", "finalizedBlockHashes": [hash(block)]})
}

fn new_block(block: u8, parent: u8) -> serde_json::Value {
    json!({"event": "newBlock", "blockHash": hash(block), "parentBlockHash": hash(parent)})
}

fn decoded_new_block(block: u8, parent: u8) -> FollowEvent {
    FollowEvent::NewBlock {
        block_hash: HashHexString([block; 32]),
        parent_block_hash: HashHexString([parent; 32]),
        new_runtime: None,
    }
}

/// Sends a `chainHead_v1_follow` request through the pipeline and answers it.
fn follow(pipeline: &mut Pipeline, request_id: &str, subscription: &str) {
    pipeline.push_client_to_server(request(request_id, "chainHead_v1_follow", vec![json!(true)]));
    assert_eq!(
        pipeline.pop_client_to_server().unwrap().method,
        "chainHead_v1_follow"
    );
    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str(request_id.into()),
        outcome: Ok(json!(subscription)),
    });
    assert!(matches!(
        pipeline.pop_server_to_client(),
        Some(ServerToClient::Response { .. })
    ));
}

fn events(pipeline: &mut Pipeline, subscription: &str) -> Vec<FollowEvent> {
    let mut out = Vec::new();
    while let Some(message) = pipeline.pop_server_to_client() {
        match message {
            ServerToClient::FollowEvent {
                subscription: s,
                event,
            } if s == subscription => out.push(event),
            other => panic!("{other:?}"),
        }
    }
    out
}

#[test]
fn child_announced_before_parent() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");

    pipeline.push_server_to_client(follow_event("sub", initialized(0xa)));
    pipeline.push_server_to_client(follow_event("sub", new_block(0xc, 0xb)));
    pipeline.push_server_to_client(follow_event("sub", new_block(0xb, 0xa)));

    assert_eq!(
        events(&mut pipeline, "sub"),
        vec![
            FollowEvent::Initialized {
                finalized_block_hashes: vec![HashHexString([0xa; 32])],
                finalized_block_runtime: None,
            },
            decoded_new_block(0xb, 0xa),
            decoded_new_block(0xc, 0xb),
        ]
    );
}

#[test]
fn causal_order_any_permutation() {
    use rand::{seq::SliceRandom as _, SeedableRng as _};

    for seed in 0..64u64 {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

        // Block `n` has a random parent among the blocks `0..n`.
        let parents = (1..=24u8)
            .map(|n| (n, rand::Rng::gen_range(&mut rng, 0..n)))
            .collect::<Vec<_>>();
        let mut shuffled = parents.clone();
        shuffled.shuffle(&mut rng);

        let mut pipeline = pipeline_with(Config {
            legacy_method_names: false,
            max_buffered_events: 64,
            randomness_seed: [0; 32],
        });
        follow(&mut pipeline, "1", "sub");
        pipeline.push_server_to_client(follow_event("sub", initialized(0)));
        for (block, parent) in &shuffled {
            pipeline.push_server_to_client(follow_event("sub", new_block(*block, *parent)));
        }

        let mut emitted = vec![[0u8; 32]];
        for event in events(&mut pipeline, "sub").into_iter().skip(1) {
            let FollowEvent::NewBlock {
                block_hash,
                parent_block_hash,
                ..
            } = event
            else {
                panic!()
            };
            assert!(emitted.contains(&parent_block_hash.0));
            emitted.push(block_hash.0);
        }
        assert_eq!(emitted.len(), parents.len() + 1);
    }
}

#[test]
fn events_before_initialized() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");

    pipeline.push_server_to_client(follow_event("sub", new_block(2, 1)));
    pipeline.push_server_to_client(follow_event(
        "sub",
        json!({"event": "bestBlockChanged", "bestBlockHash": hash(2)}),
    ));
    assert!(pipeline.pop_server_to_client().is_none());

    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    let events = events(&mut pipeline, "sub");
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], FollowEvent::Initialized { .. }));
    assert_eq!(events[1], decoded_new_block(2, 1));
    assert_eq!(
        events[2],
        FollowEvent::BestBlockChanged {
            best_block_hash: HashHexString([2; 32])
        }
    );
}

#[test]
fn stop_flushes_buffered_events() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");

    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    pipeline.push_server_to_client(follow_event("sub", new_block(4, 3)));
    pipeline.push_server_to_client(follow_event("sub", new_block(5, 4)));
    let _ = events(&mut pipeline, "sub");

    pipeline.push_server_to_client(follow_event("sub", json!({"event": "stop"})));
    assert_eq!(
        events(&mut pipeline, "sub"),
        vec![
            decoded_new_block(4, 3),
            decoded_new_block(5, 4),
            FollowEvent::Stop {}
        ]
    );
}

#[test]
fn reorder_overflow_stops_subscription() {
    let mut pipeline = pipeline_with(Config {
        legacy_method_names: false,
        max_buffered_events: 2,
        randomness_seed: [0; 32],
    });
    follow(&mut pipeline, "1", "sub");

    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    let _ = events(&mut pipeline, "sub");

    for n in 10..13 {
        pipeline.push_server_to_client(follow_event("sub", new_block(n + 10, n)));
    }

    assert_eq!(events(&mut pipeline, "sub"), vec![FollowEvent::Stop {}]);

    let unfollow = pipeline.pop_client_to_server().unwrap();
    assert_eq!(unfollow.method, "chainHead_v1_unfollow");
    assert_eq!(unfollow.params, vec![json!("sub")]);
    assert!(pipeline.pop_client_to_server().is_none());

    // Later notifications and the response to the generated request are discarded.
    pipeline.push_server_to_client(follow_event("sub", new_block(30, 1)));
    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str(unfollow.id),
        outcome: Ok(json!(null)),
    });
    assert!(pipeline.pop_server_to_client().is_none());
}

#[test]
fn numeric_subscription_id_round_trip() {
    let mut pipeline = pipeline();

    pipeline.push_client_to_server(request("1", "chainHead_v1_follow", vec![json!(true)]));
    let _ = pipeline.pop_client_to_server().unwrap();
    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Num(1),
        outcome: Ok(json!(5)),
    });
    assert_eq!(
        pipeline.pop_server_to_client(),
        Some(ServerToClient::Response {
            id: WireId::Str("1".into()),
            outcome: Ok(json!("5")),
        })
    );

    pipeline.push_server_to_client(ServerToClient::Notification {
        method: "chainHead_v1_followEvent".into(),
        subscription: WireId::Num(5),
        result: initialized(1),
    });
    assert_eq!(events(&mut pipeline, "5").len(), 1);

    pipeline.push_client_to_server(request(
        "2",
        "chainHead_v1_header",
        vec![json!("5"), json!(hash(1))],
    ));
    let header = pipeline.pop_client_to_server().unwrap();
    assert_eq!(header.params[0], json!(5));

    pipeline.push_client_to_server(request("3", "chainHead_v1_unfollow", vec![json!("5")]));
    let unfollow = pipeline.pop_client_to_server().unwrap();
    assert_eq!(unfollow.params, vec![json!(5)]);

    // The subscription has been forgotten.
    pipeline.push_client_to_server(request("4", "chainHead_v1_unfollow", vec![json!("5")]));
    let unfollow = pipeline.pop_client_to_server().unwrap();
    assert_eq!(unfollow.params, vec![json!("5")]);
}

#[test]
fn legacy_method_names() {
    let mut pipeline = pipeline_with(Config {
        legacy_method_names: true,
        max_buffered_events: 16,
        randomness_seed: [0; 32],
    });

    pipeline.push_client_to_server(request("1", "chainHead_v1_follow", vec![json!(true)]));
    assert_eq!(
        pipeline.pop_client_to_server().unwrap().method,
        "chainHead_unstable_follow"
    );
    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str("1".into()),
        outcome: Ok(json!("sub")),
    });
    let _ = pipeline.pop_server_to_client().unwrap();

    pipeline.push_server_to_client(ServerToClient::Notification {
        method: "chainHead_unstable_followEvent".into(),
        subscription: WireId::Str("sub".into()),
        result: json!({
            "event": "initialized",
            "finalizedBlockHash": hash(1),
            "finalizedBlockRuntime": {
                "spec": {
                    "specName": "foo",
                    "implName": "bar",
                    "specVersion": 1,
                    "implVersion": 2,
                    "apis": [["0x0102030405060708", 3]]
                }
            }
        }),
    });

    let events = events(&mut pipeline, "sub");
    let [FollowEvent::Initialized {
        finalized_block_hashes,
        finalized_block_runtime: Some(MaybeRuntimeSpec::Valid { spec }),
    }] = &events[..]
    else {
        panic!("{events:?}")
    };
    assert_eq!(finalized_block_hashes, &[HashHexString([1; 32])]);
    assert_eq!(spec.spec_name, "foo");
    assert_eq!(spec.apis.get("0x0102030405060708"), Some(&3));

    pipeline.push_server_to_client(ServerToClient::Notification {
        method: "transaction_unstable_watchEvent".into(),
        subscription: WireId::Str("tx".into()),
        result: json!({"event": "validated"}),
    });
    assert!(matches!(
        pipeline.pop_server_to_client(),
        Some(ServerToClient::Notification { method, .. }) if method == "transactionWatch_v1_watchEvent"
    ));
}

#[test]
fn legacy_finalized_shape() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");
    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    pipeline.push_server_to_client(follow_event("sub", new_block(2, 1)));
    pipeline.push_server_to_client(follow_event(
        "sub",
        json!({"event": "finalized", "finalizedBlocksHashes": [hash(2)]}),
    ));

    assert_eq!(
        events(&mut pipeline, "sub").last(),
        Some(&FollowEvent::Finalized {
            finalized_block_hashes: vec![HashHexString([2; 32])],
            pruned_block_hashes: Vec::new(),
        })
    );
}

#[test]
fn malformed_event_stops_subscription() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");
    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    let _ = events(&mut pipeline, "sub");

    pipeline.push_server_to_client(follow_event(
        "sub",
        json!({"event": "newBlock", "parentBlockHash": hash(1)}),
    ));
    assert_eq!(events(&mut pipeline, "sub"), vec![FollowEvent::Stop {}]);

    let unfollow = pipeline.pop_client_to_server().unwrap();
    assert_eq!(unfollow.method, "chainHead_v1_unfollow");
    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str(unfollow.id),
        outcome: Ok(json!(null)),
    });
    assert!(pipeline.pop_server_to_client().is_none());
}

#[test]
fn unknown_event_discarded() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");
    pipeline.push_server_to_client(follow_event(
        "sub",
        json!({"event": "operationBodyDone", "operationId": "3", "value": []}),
    ));
    assert!(pipeline.pop_server_to_client().is_none());
    assert!(pipeline.pop_client_to_server().is_none());
}

#[test]
fn premature_best_block_deferred() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");
    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    let _ = events(&mut pipeline, "sub");

    pipeline.push_server_to_client(follow_event(
        "sub",
        json!({"event": "bestBlockChanged", "bestBlockHash": hash(2)}),
    ));
    pipeline.push_server_to_client(follow_event(
        "sub",
        json!({"event": "bestBlockChanged", "bestBlockHash": hash(1)}),
    ));
    assert!(pipeline.pop_server_to_client().is_none());

    pipeline.push_server_to_client(follow_event("sub", new_block(2, 1)));
    // Duplicate announcement.
    pipeline.push_server_to_client(follow_event("sub", new_block(2, 1)));

    assert_eq!(
        events(&mut pipeline, "sub"),
        vec![
            decoded_new_block(2, 1),
            FollowEvent::BestBlockChanged {
                best_block_hash: HashHexString([2; 32])
            },
            FollowEvent::BestBlockChanged {
                best_block_hash: HashHexString([1; 32])
            },
        ]
    );
}

#[test]
fn deferred_events_flushed_before_stop() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");
    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    let _ = events(&mut pipeline, "sub");

    pipeline.push_server_to_client(follow_event(
        "sub",
        json!({"event": "finalized", "finalizedBlockHashes": [hash(9)], "prunedBlockHashes": []}),
    ));
    pipeline.push_server_to_client(follow_event("sub", json!({"event": "stop"})));

    let events = events(&mut pipeline, "sub");
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], FollowEvent::Finalized { .. }));
    assert_eq!(events[1], FollowEvent::Stop {});
}

#[test]
fn unpin_idempotent() {
    let mut pipeline = pipeline();
    follow(&mut pipeline, "1", "sub");
    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    pipeline.push_server_to_client(follow_event("sub", new_block(2, 1)));
    let _ = events(&mut pipeline, "sub");

    // Single hash given as a string, and in uppercase.
    pipeline.push_client_to_server(request(
        "2",
        "chainHead_v1_unpin",
        vec![json!("sub"), json!(hash(2).to_uppercase().replace("0X", "0x"))],
    ));
    let unpin = pipeline.pop_client_to_server().unwrap();
    assert!(unpin.params[1].is_array());
    assert_eq!(unpin.params[1].as_array().unwrap().len(), 1);

    // Second unpin of the same block, and unpin of a block that was never pinned.
    pipeline.push_client_to_server(request(
        "3",
        "chainHead_v1_unpin",
        vec![json!("sub"), json!([hash(2), hash(7)])],
    ));
    assert!(pipeline.pop_client_to_server().is_none());
    assert_eq!(
        pipeline.pop_server_to_client(),
        Some(ServerToClient::Response {
            id: WireId::Str("3".into()),
            outcome: Ok(json!(null)),
        })
    );

    // Duplicates within the same request.
    pipeline.push_client_to_server(request(
        "4",
        "chainHead_v1_unpin",
        vec![json!("sub"), json!([hash(1), hash(1)])],
    ));
    let unpin = pipeline.pop_client_to_server().unwrap();
    assert_eq!(unpin.params[1], json!([hash(1)]));
}

#[test]
fn storage_result_normalized() {
    let mut pipeline = pipeline();
    pipeline.push_client_to_server(request(
        "7",
        "chainHead_v1_storage",
        vec![
            json!("sub"),
            json!(hash(1)),
            json!([
                {"key": "0x01", "type": "value"},
                {"key": "0x02", "type": "descendantsHashes"},
                {"key": "0x03", "type": "descendantsValues"},
            ]),
            json!(null),
        ],
    ));
    let _ = pipeline.pop_client_to_server().unwrap();

    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str("7".into()),
        outcome: Ok(json!({
            "values": {"0x01": "0xAA"},
            "descendantsHashes": [["0x0201", "0xBB"], {"key": "0x0202", "hash": "0xcc"}],
        })),
    });

    let Some(ServerToClient::Response {
        outcome: Ok(result),
        ..
    }) = pipeline.pop_server_to_client()
    else {
        panic!()
    };
    assert_eq!(
        result,
        json!({
            "values": [{"key": "0x01", "value": "0xaa"}],
            "hashes": [],
            "closests": [],
            "descendantsValues": [],
            "descendantsHashes": [
                {"key": "0x0201", "value": "0xbb"},
                {"key": "0x0202", "value": "0xcc"},
            ],
        })
    );
}

#[test]
fn storage_flat_list_classified() {
    let mut pipeline = pipeline();
    pipeline.push_client_to_server(request(
        "7",
        "chainHead_v1_storage",
        vec![
            json!("sub"),
            json!(hash(1)),
            json!([
                {"key": "0x01", "type": "hash"},
                {"key": "0x03", "type": "descendantsValues"},
            ]),
        ],
    ));
    let _ = pipeline.pop_client_to_server().unwrap();

    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str("7".into()),
        outcome: Ok(json!([
            {"key": "0x01", "hash": "0x11"},
            {"key": "0x0301", "value": "0x22"},
        ])),
    });

    let Some(ServerToClient::Response {
        outcome: Ok(result),
        ..
    }) = pipeline.pop_server_to_client()
    else {
        panic!()
    };
    assert_eq!(result["hashes"], json!([{"key": "0x01", "value": "0x11"}]));
    assert_eq!(
        result["descendantsValues"],
        json!([{"key": "0x0301", "value": "0x22"}])
    );
    assert_eq!(result["values"], json!([]));
}

#[test]
fn storage_reply_without_lists_untouched() {
    let mut pipeline = pipeline();

    for (id, reply) in [
        ("1", json!({"result": "limitReached"})),
        ("2", json!({"result": "started", "operationId": "4", "discardedItems": 0})),
    ] {
        pipeline.push_client_to_server(request(
            id,
            "chainHead_v1_storage",
            vec![
                json!("sub"),
                json!(hash(1)),
                json!([{"key": "0x01", "type": "value"}]),
            ],
        ));
        let _ = pipeline.pop_client_to_server().unwrap();

        pipeline.push_server_to_client(ServerToClient::Response {
            id: WireId::Str(id.into()),
            outcome: Ok(reply.clone()),
        });
        assert_eq!(
            pipeline.pop_server_to_client(),
            Some(ServerToClient::Response {
                id: WireId::Str(id.into()),
                outcome: Ok(reply.clone()),
            })
        );

        assert_eq!(
            super::descendants::normalize_storage_result(reply.clone(), &[]),
            reply
        );
    }
}

#[test]
fn chain_spec_fallback() {
    let mut pipeline = pipeline();
    pipeline.push_client_to_server(request("1", "chainSpec_v1_chainName", Vec::new()));
    let _ = pipeline.pop_client_to_server().unwrap();

    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str("1".into()),
        outcome: Err(RpcError {
            code: RpcError::METHOD_NOT_FOUND,
            message: "Method not found".into(),
            data: None,
        }),
    });
    assert!(pipeline.pop_server_to_client().is_none());

    let fallback = pipeline.pop_client_to_server().unwrap();
    assert_eq!(fallback.method, "system_chain");
    assert_ne!(fallback.id, "1");

    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str(fallback.id),
        outcome: Ok(json!("Polkadot")),
    });
    assert_eq!(
        pipeline.pop_server_to_client(),
        Some(ServerToClient::Response {
            id: WireId::Str("1".into()),
            outcome: Ok(json!("Polkadot")),
        })
    );
}

#[test]
fn chain_spec_normalization() {
    let mut pipeline = pipeline();
    pipeline.push_client_to_server(request("1", "chainSpec_v1_properties", Vec::new()));
    pipeline.push_client_to_server(request("2", "chainSpec_v1_genesisHash", Vec::new()));
    let _ = pipeline.pop_client_to_server().unwrap();
    let _ = pipeline.pop_client_to_server().unwrap();

    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str("1".into()),
        outcome: Ok(json!(null)),
    });
    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str("2".into()),
        outcome: Ok(json!("0xABCD")),
    });

    assert_eq!(
        pipeline.pop_server_to_client(),
        Some(ServerToClient::Response {
            id: WireId::Str("1".into()),
            outcome: Ok(json!({})),
        })
    );
    assert_eq!(
        pipeline.pop_server_to_client(),
        Some(ServerToClient::Response {
            id: WireId::Str("2".into()),
            outcome: Ok(json!("0xabcd")),
        })
    );
}

#[test]
fn transaction_notifications_untouched() {
    let mut pipeline = pipeline();
    let notification = ServerToClient::Notification {
        method: "transactionWatch_v1_watchEvent".into(),
        subscription: WireId::Num(3),
        result: json!({"event": "broadcasted", "numPeers": 2}),
    };
    pipeline.push_server_to_client(notification);
    assert_eq!(
        pipeline.pop_server_to_client(),
        Some(ServerToClient::Notification {
            method: "transactionWatch_v1_watchEvent".into(),
            subscription: WireId::Str("3".into()),
            result: json!({"event": "broadcasted", "numPeers": 2}),
        })
    );
}

#[test]
fn premature_overflow_stops_subscription() {
    let mut pipeline = pipeline_with(Config {
        legacy_method_names: false,
        max_buffered_events: 2,
        randomness_seed: [0; 32],
    });
    follow(&mut pipeline, "1", "sub");

    pipeline.push_server_to_client(follow_event("sub", initialized(1)));
    let _ = events(&mut pipeline, "sub");

    // None of these blocks is ever announced.
    for n in 20..22 {
        pipeline.push_server_to_client(follow_event(
            "sub",
            json!({"event": "bestBlockChanged", "bestBlockHash": hash(n)}),
        ));
    }
    assert!(pipeline.pop_server_to_client().is_none());
    assert!(pipeline.pop_client_to_server().is_none());

    pipeline.push_server_to_client(follow_event(
        "sub",
        json!({"event": "bestBlockChanged", "bestBlockHash": hash(22)}),
    ));

    // The deferred events are discarded rather than emitted.
    assert_eq!(events(&mut pipeline, "sub"), vec![FollowEvent::Stop {}]);

    let unfollow = pipeline.pop_client_to_server().unwrap();
    assert_eq!(unfollow.method, "chainHead_v1_unfollow");
    assert_eq!(unfollow.params, vec![json!("sub")]);
    assert!(pipeline.pop_client_to_server().is_none());

    // Announcing the blocks afterwards doesn't bring the subscription back.
    pipeline.push_server_to_client(follow_event("sub", new_block(20, 1)));
    pipeline.push_server_to_client(ServerToClient::Response {
        id: WireId::Str(unfollow.id),
        outcome: Ok(json!(null)),
    });
    assert!(pipeline.pop_server_to_client().is_none());
}

#[test]
fn numeric_ids_stage_tracks_subscriptions() {
    let mut stage = NumericIds::new(&mut SeedSource::new([0; 32]));
    let mut output = StageOutput::default();

    stage.client_to_server(
        request("1", "chainHead_v1_follow", vec![json!(true)]),
        &mut output,
    );
    stage.client_to_server(
        request("2", "chainHead_v1_follow", vec![json!(true)]),
        &mut output,
    );
    stage.server_to_client(
        ServerToClient::Response {
            id: WireId::Num(1),
            outcome: Ok(json!(12)),
        },
        &mut output,
    );
    stage.server_to_client(
        ServerToClient::Response {
            id: WireId::Str("2".into()),
            outcome: Ok(json!("13")),
        },
        &mut output,
    );
    assert!(stage.is_numeric("12"));
    assert!(!stage.is_numeric("13"));

    stage.server_to_client(
        ServerToClient::Notification {
            method: "chainHead_v1_followEvent".into(),
            subscription: WireId::Num(12),
            result: json!({"event": "stop"}),
        },
        &mut output,
    );
    assert!(!stage.is_numeric("12"));
}

#[test]
fn unpin_stage_counts_pinned_blocks() {
    let mut stage = Unpin::new(&mut SeedSource::new([0; 32]));
    let mut output = StageOutput::default();

    stage.client_to_server(
        request("1", "chainHead_v1_follow", vec![json!(true)]),
        &mut output,
    );
    assert_eq!(stage.num_pinned("sub"), None);
    stage.server_to_client(
        ServerToClient::Response {
            id: WireId::Str("1".into()),
            outcome: Ok(json!("sub")),
        },
        &mut output,
    );
    assert_eq!(stage.num_pinned("sub"), Some(0));

    for event in [
        FollowEvent::Initialized {
            finalized_block_hashes: vec![HashHexString([1; 32])],
            finalized_block_runtime: None,
        },
        decoded_new_block(2, 1),
        decoded_new_block(3, 2),
    ] {
        stage.server_to_client(
            ServerToClient::FollowEvent {
                subscription: "sub".into(),
                event,
            },
            &mut output,
        );
    }
    assert_eq!(stage.num_pinned("sub"), Some(3));

    stage.client_to_server(
        request("2", "chainHead_v1_unpin", vec![json!("sub"), json!([hash(2)])]),
        &mut output,
    );
    assert_eq!(stage.num_pinned("sub"), Some(2));

    stage.server_to_client(
        ServerToClient::FollowEvent {
            subscription: "sub".into(),
            event: FollowEvent::Stop {},
        },
        &mut output,
    );
    assert_eq!(stage.num_pinned("sub"), None);
}
