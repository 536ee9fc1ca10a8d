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


use crate::{
    chain_head_follow::{FollowEvent, FollowSetup, QueryError, UnpinError},
    transactions::{WatchEvent, WatchSetup},
    util, RequestError, ToBackground,
};

use futures_channel::oneshot;
use futures_lite::{future, FutureExt as _};
use smoldot_chainhead::{
    chain_head::{self, ChainHead},
    compat,
    json_rpc::{
        methods::{self, names},
        multiplexer::{self, Multiplexer, NotificationPayload, RequestId},
        parse, RpcError, ServerToClient,
    },
    transaction_watch::TransactionWatch,
};

/// Configuration for [`Background::new`].
pub(crate) struct Config {
    pub log_target: String,
    pub to_server: async_channel::Sender<String>,
    pub from_server: async_channel::Receiver<String>,
    pub from_frontend: async_channel::Receiver<ToBackground>,
    pub compat: compat::Config,
    pub follow_events_capacity: usize,
    pub randomness_seed: [u8; 32],
}

/// Fields used by the background task.
pub(crate) struct Background {
    /// Target to use for all the logs.
    log_target: String,

    to_server: async_channel::Sender<String>,
    from_server: async_channel::Receiver<String>,
    from_frontend: async_channel::Receiver<ToBackground>,

    /// Sits between the channels of the server and [`Background::multiplexer`].
    pipeline: compat::Pipeline,

    multiplexer: Multiplexer<PendingRequest, Subscription>,

    /// Requests started through [`ToBackground::Request`], indexed by ticket, so that they can
    /// be cancelled.
    tickets: hashbrown::HashMap<u64, RequestId, fnv::FnvBuildHasher>,

    /// Active follow subscriptions, indexed by an identifier local to this task.
    follows: hashbrown::HashMap<u64, Follow, fnv::FnvBuildHasher>,

    /// Active transaction watches, indexed by an identifier local to this task.
    watches: hashbrown::HashMap<u64, Watch, fnv::FnvBuildHasher>,

    /// Identifier to assign to the next follow subscription or transaction watch.
    next_local_id: u64,

    /// See [`crate::Config::follow_events_capacity`].
    follow_events_capacity: usize,

    /// `true` if the connection to the server has been lost. Nothing is sent to or read from
    /// the server anymore.
    disconnected: bool,
}

/// User data of the requests in the multiplexer.
enum PendingRequest {
    Plain {
        ticket: u64,
        result_tx: oneshot::Sender<Result<serde_json::Value, RequestError>>,
    },
    Follow {
        result_tx: oneshot::Sender<Result<FollowSetup, RequestError>>,
    },
    FollowQuery {
        follow_id: u64,
        query_id: chain_head::QueryId,
        result_tx: oneshot::Sender<Result<serde_json::Value, QueryError>>,
    },
    /// `None` for the unpin requests sent automatically for pruned blocks.
    Unpin {
        result_tx: Option<oneshot::Sender<Result<(), UnpinError>>>,
    },
    SubmitAndWatch {
        result_tx: oneshot::Sender<Result<WatchSetup, RequestError>>,
    },
    /// Request whose response is only logged. Contains the name of the method.
    Detached(&'static str),
}

/// User data of the subscriptions in the multiplexer.
#[derive(Debug, Copy, Clone)]
enum Subscription {
    Follow(u64),
    Watch(u64),
}

struct Follow {
    subscription_id: String,
    chain_head: ChainHead,
    events_tx: async_channel::Sender<FollowEvent>,
    /// Queries in progress, so that they can be rejected immediately when the subscription
    /// ends.
    queries: hashbrown::HashMap<chain_head::QueryId, RequestId, fnv::FnvBuildHasher>,
}

struct Watch {
    subscription_id: String,
    watch: TransactionWatch,
    updates_tx: async_channel::Sender<WatchEvent>,
}

impl Background {
    pub(crate) fn new(config: Config) -> Self {
        Background {
            log_target: config.log_target,
            to_server: config.to_server,
            from_server: config.from_server,
            from_frontend: config.from_frontend,
            pipeline: compat::Pipeline::new(config.compat),
            multiplexer: Multiplexer::new(multiplexer::Config {
                requests_capacity: 16,
                subscriptions_capacity: 8,
                randomness_seed: config.randomness_seed,
            }),
            tickets: hashbrown::HashMap::with_capacity_and_hasher(16, Default::default()),
            follows: hashbrown::HashMap::with_capacity_and_hasher(2, Default::default()),
            watches: hashbrown::HashMap::with_capacity_and_hasher(4, Default::default()),
            next_local_id: 0,
            follow_events_capacity: config.follow_events_capacity.max(1),
            disconnected: false,
        }
    }
}

pub(crate) async fn run(mut me: Background) {
    log::debug!(target: &me.log_target, "Background task started");

    loop {
        // Yield at every loop in order to provide better tasks granularity.
        future::yield_now().await;

        enum WakeUpReason {
            Frontend(ToBackground),
            FrontendClosed,
            Server(String),
            ServerClosed,
        }

        let wake_up_reason = {
            let from_frontend = &me.from_frontend;
            let from_server = &me.from_server;
            let server_open = !me.disconnected;

            async {
                from_frontend
                    .recv()
                    .await
                    .map_or(WakeUpReason::FrontendClosed, WakeUpReason::Frontend)
            }
            .or(async {
                if server_open {
                    from_server
                        .recv()
                        .await
                        .map_or(WakeUpReason::ServerClosed, WakeUpReason::Server)
                } else {
                    future::pending().await
                }
            })
            .await
        };

        match wake_up_reason {
            WakeUpReason::Frontend(message) => me.on_frontend_message(message),
            WakeUpReason::FrontendClosed => {
                log::debug!(target: &me.log_target, "All frontends destroyed, shutting down");
                return;
            }
            WakeUpReason::Server(message) => {
                log::debug!(target: &me.log_target, "JSON-RPC <= {}", util::log_message(&message));
                match parse::parse_server_message(&message) {
                    Ok(message) => me.pipeline.push_server_to_client(message),
                    Err(error) => log::warn!(
                        target: &me.log_target,
                        "Failed to parse message from server: {}", error
                    ),
                }
            }
            WakeUpReason::ServerClosed => me.on_disconnected(),
        }

        me.pump().await;
    }
}

impl Background {
    /// Moves messages between the multiplexer, the pipeline and the server until nothing moves
    /// anymore.
    async fn pump(&mut self) {
        loop {
            while let Some(request) = self.multiplexer.next_request() {
                self.pipeline.push_client_to_server(request);
            }

            if let Some(message) = self.pipeline.pop_server_to_client() {
                self.on_server_message(message);
                continue;
            }

            let Some(request) = self.pipeline.pop_client_to_server() else {
                break;
            };

            if self.disconnected {
                continue;
            }

            let request_json = parse::build_request(&request);
            log::debug!(target: &self.log_target, "JSON-RPC => {}", util::log_message(&request_json));
            if self.to_server.send(request_json).await.is_err() {
                self.on_disconnected();
            }
        }
    }

    fn on_frontend_message(&mut self, message: ToBackground) {
        match message {
            ToBackground::Request {
                ticket,
                method,
                params,
                result_tx,
            } => {
                if self.disconnected {
                    let _ = result_tx.send(Err(RequestError::Disconnected));
                    return;
                }

                let request_id = self.multiplexer.start_request(
                    method,
                    params,
                    PendingRequest::Plain { ticket, result_tx },
                );
                self.tickets.insert(ticket, request_id);
            }

            ToBackground::CancelRequest { ticket } => {
                if let Some(request_id) = self.tickets.remove(&ticket) {
                    log::debug!(target: &self.log_target, "Request {} cancelled", request_id);
                    let _ = self.multiplexer.cancel_request(&request_id);
                }
            }

            ToBackground::Follow {
                with_runtime,
                result_tx,
            } => {
                if self.disconnected {
                    let _ = result_tx.send(Err(RequestError::Disconnected));
                    return;
                }

                self.multiplexer.start_request(
                    names::CHAIN_HEAD_FOLLOW,
                    vec![serde_json::Value::Bool(with_runtime)],
                    PendingRequest::Follow { result_tx },
                );
            }

            ToBackground::FollowQuery {
                follow_id,
                block_hash,
                kind,
                extra_params,
                result_tx,
            } => {
                if self.disconnected {
                    let _ = result_tx.send(Err(QueryError::Request(RequestError::Disconnected)));
                    return;
                }

                let Some(follow) = self.follows.get_mut(&follow_id) else {
                    let _ = result_tx.send(Err(QueryError::Rejected(
                        chain_head::QueryError::SessionEnded,
                    )));
                    return;
                };

                let query_id = match follow.chain_head.start_query(&block_hash, kind) {
                    Ok(query_id) => query_id,
                    Err(error) => {
                        let _ = result_tx.send(Err(QueryError::Rejected(error)));
                        return;
                    }
                };

                let mut params = Vec::with_capacity(2 + extra_params.len());
                params.push(serde_json::Value::String(follow.subscription_id.clone()));
                params.push(util::hex_json(&block_hash));
                params.extend(extra_params);

                let request_id = self.multiplexer.start_request(
                    kind.method_name(),
                    params,
                    PendingRequest::FollowQuery {
                        follow_id,
                        query_id,
                        result_tx,
                    },
                );
                follow.queries.insert(query_id, request_id);
            }

            ToBackground::Unpin {
                follow_id,
                hashes,
                result_tx,
            } => {
                let Some(follow) = self.follows.get_mut(&follow_id) else {
                    let _ = result_tx.send(Err(UnpinError::Rejected(
                        chain_head::UnpinError::SessionEnded,
                    )));
                    return;
                };

                match follow.chain_head.unpin(&hashes) {
                    Err(error) => {
                        let _ = result_tx.send(Err(UnpinError::Rejected(error)));
                    }
                    Ok(hashes) if hashes.is_empty() => {
                        let _ = result_tx.send(Ok(()));
                    }
                    Ok(hashes) => {
                        let params = unpin_params(&follow.subscription_id, &hashes);
                        self.multiplexer.start_request(
                            names::CHAIN_HEAD_UNPIN,
                            params,
                            PendingRequest::Unpin {
                                result_tx: Some(result_tx),
                            },
                        );
                    }
                }
            }

            ToBackground::Unfollow { follow_id } => self.unfollow(follow_id),

            ToBackground::SubmitAndWatch {
                transaction,
                result_tx,
            } => {
                if self.disconnected {
                    let _ = result_tx.send(Err(RequestError::Disconnected));
                    return;
                }

                self.multiplexer.start_request(
                    names::TRANSACTION_SUBMIT_AND_WATCH,
                    vec![util::hex_json(&transaction)],
                    PendingRequest::SubmitAndWatch { result_tx },
                );
            }

            ToBackground::CancelWatch { watch_id } => {
                let Some(mut watch) = self.watches.remove(&watch_id) else {
                    return;
                };

                watch.watch.cancel();
                self.multiplexer.detach(&watch.subscription_id);
                if watch.watch.take_unwatch() {
                    self.send_unwatch(watch.subscription_id);
                }
            }
        }
    }

    fn on_server_message(&mut self, message: ServerToClient) {
        enum Dispatch {
            Response(PendingRequest, Result<serde_json::Value, RpcError>),
            Notification(String, Subscription, NotificationPayload),
        }

        let dispatch = match self.multiplexer.inject_server_message(message) {
            Ok(None) => return,
            Ok(Some(multiplexer::Event::Response {
                user_data, outcome, ..
            })) => Dispatch::Response(user_data, outcome),
            Ok(Some(multiplexer::Event::Notification {
                subscription_id,
                user_data,
                payload,
            })) => Dispatch::Notification(subscription_id, *user_data, payload),
            Err(error) => {
                log::warn!(target: &self.log_target, "Protocol error: {}", error);
                return;
            }
        };

        match dispatch {
            Dispatch::Response(user_data, outcome) => self.on_response(user_data, outcome),
            Dispatch::Notification(
                _,
                Subscription::Follow(follow_id),
                NotificationPayload::FollowEvent(event),
            ) => self.on_follow_event(follow_id, event),
            Dispatch::Notification(
                _,
                Subscription::Watch(watch_id),
                NotificationPayload::Json { method, result },
            ) => self.on_watch_notification(watch_id, method, result),
            Dispatch::Notification(subscription_id, subscription, payload) => {
                log::warn!(
                    target: &self.log_target,
                    "Unexpected notification on subscription {} ({:?}): {:?}",
                    subscription_id, subscription, payload
                );
            }
        }
    }

    fn on_response(
        &mut self,
        user_data: PendingRequest,
        outcome: Result<serde_json::Value, RpcError>,
    ) {
        match user_data {
            PendingRequest::Plain { ticket, result_tx } => {
                self.tickets.remove(&ticket);
                let _ = result_tx.send(outcome.map_err(RequestError::Rpc));
            }

            PendingRequest::Follow { result_tx } => {
                let subscription_id = match subscription_id_of(outcome) {
                    Ok(id) => id,
                    Err(error) => {
                        let _ = result_tx.send(Err(error));
                        return;
                    }
                };

                let follow_id = self.next_local_id;
                self.next_local_id += 1;

                let mut chain_head = ChainHead::new();
                // A newly-created `ChainHead` is never already following.
                let _ = chain_head.follow();

                let (events_tx, events_rx) = async_channel::bounded(self.follow_events_capacity);
                if result_tx
                    .send(Ok(FollowSetup {
                        follow_id,
                        events_rx,
                    }))
                    .is_err()
                {
                    // The frontend has stopped waiting.
                    self.send_unfollow(subscription_id);
                    return;
                }

                log::debug!(
                    target: &self.log_target,
                    "Follow subscription {} started", subscription_id
                );

                self.multiplexer
                    .attach(subscription_id.clone(), Subscription::Follow(follow_id));
                self.follows.insert(
                    follow_id,
                    Follow {
                        subscription_id,
                        chain_head,
                        events_tx,
                        queries: hashbrown::HashMap::with_capacity_and_hasher(
                            4,
                            Default::default(),
                        ),
                    },
                );
            }

            PendingRequest::FollowQuery {
                follow_id,
                query_id,
                result_tx,
            } => {
                let still_valid = match self.follows.get_mut(&follow_id) {
                    Some(follow) => {
                        follow.queries.remove(&query_id);
                        follow.chain_head.finish_query(query_id).is_ok()
                    }
                    None => false,
                };

                let _ = result_tx.send(if still_valid {
                    outcome.map_err(|error| QueryError::Request(RequestError::Rpc(error)))
                } else {
                    Err(QueryError::Rejected(chain_head::QueryError::SessionEnded))
                });
            }

            PendingRequest::Unpin {
                result_tx: Some(result_tx),
            } => {
                let _ = result_tx.send(
                    outcome
                        .map(|_| ())
                        .map_err(|error| UnpinError::Request(RequestError::Rpc(error))),
                );
            }

            PendingRequest::Unpin { result_tx: None } => {
                if let Err(error) = outcome {
                    log::warn!(
                        target: &self.log_target,
                        "Failed to unpin pruned blocks: {}", error
                    );
                }
            }

            PendingRequest::SubmitAndWatch { result_tx } => {
                let subscription_id = match subscription_id_of(outcome) {
                    Ok(id) => id,
                    Err(error) => {
                        let _ = result_tx.send(Err(error));
                        return;
                    }
                };

                let watch_id = self.next_local_id;
                self.next_local_id += 1;

                let (updates_tx, updates_rx) = async_channel::unbounded();
                if result_tx
                    .send(Ok(WatchSetup {
                        watch_id,
                        updates_rx,
                    }))
                    .is_err()
                {
                    self.send_unwatch(subscription_id);
                    return;
                }

                log::debug!(
                    target: &self.log_target,
                    "Transaction watch {} started", subscription_id
                );

                self.multiplexer
                    .attach(subscription_id.clone(), Subscription::Watch(watch_id));
                self.watches.insert(
                    watch_id,
                    Watch {
                        subscription_id,
                        watch: TransactionWatch::new(),
                        updates_tx,
                    },
                );
            }

            PendingRequest::Detached(method) => {
                if let Err(error) = outcome {
                    log::debug!(target: &self.log_target, "{} failed: {}", method, error);
                }
            }
        }
    }

    fn on_follow_event(&mut self, follow_id: u64, event: methods::FollowEvent) {
        let Some(follow) = self.follows.get_mut(&follow_id) else {
            return;
        };

        let to_frontend = match follow.chain_head.inject_event(event) {
            chain_head::Notification::Initialized {
                finalized_block_hashes,
                runtime,
            } => FollowEvent::Initialized {
                finalized_block_hashes,
                runtime,
            },
            chain_head::Notification::NewBlock {
                block_hash,
                parent_block_hash,
                new_runtime,
            } => FollowEvent::NewBlock {
                block_hash,
                parent_block_hash,
                new_runtime,
            },
            chain_head::Notification::BestBlockChanged { best_block_hash } => {
                FollowEvent::BestBlockChanged { best_block_hash }
            }
            chain_head::Notification::Finalized {
                finalized_block_hashes,
                pruned_block_hashes,
                to_unpin,
            } => {
                if !to_unpin.is_empty() {
                    let params = unpin_params(&follow.subscription_id, &to_unpin);
                    self.multiplexer.start_request(
                        names::CHAIN_HEAD_UNPIN,
                        params,
                        PendingRequest::Unpin { result_tx: None },
                    );
                }

                FollowEvent::Finalized {
                    finalized_block_hashes,
                    pruned_block_hashes,
                }
            }
            chain_head::Notification::Stopped { rejected_queries } => {
                log::debug!(
                    target: &self.log_target,
                    "Follow subscription {} stopped by the server", follow.subscription_id
                );
                let _ = follow.events_tx.try_send(FollowEvent::Stop);
                if let Some(follow) = self.follows.remove(&follow_id) {
                    self.close_follow(follow, rejected_queries);
                }
                return;
            }
            chain_head::Notification::Inconsistency(error) => {
                log::warn!(
                    target: &self.log_target,
                    "Ignoring event of follow subscription {}: {}", follow.subscription_id, error
                );
                return;
            }
        };

        match follow.events_tx.try_send(to_frontend) {
            Ok(()) => {}
            Err(async_channel::TrySendError::Full(_)) => {
                log::warn!(
                    target: &self.log_target,
                    "Follow subscription {} isn't pulled quickly enough, unfollowing",
                    follow.subscription_id
                );
                self.unfollow(follow_id);
            }
            Err(async_channel::TrySendError::Closed(_)) => {
                // The frontend has been destroyed, and its `Unfollow` message is queued.
            }
        }
    }

    fn on_watch_notification(&mut self, watch_id: u64, method: String, result: serde_json::Value) {
        let Some(watch) = self.watches.get_mut(&watch_id) else {
            return;
        };

        if method != names::TRANSACTION_WATCH_EVENT {
            log::warn!(
                target: &self.log_target,
                "Unexpected notification {} on transaction watch {}", method, watch.subscription_id
            );
            return;
        }

        if let Some(update) = watch.watch.inject_notification(result) {
            let _ = watch.updates_tx.try_send(WatchEvent::from(update));
        }

        if watch.watch.take_unwatch() {
            if let Some(watch) = self.watches.remove(&watch_id) {
                self.multiplexer.detach(&watch.subscription_id);
                self.send_unwatch(watch.subscription_id);
            }
        }
    }

    /// Ends a follow subscription on the client side, and sends `chainHead_v1_unfollow`.
    fn unfollow(&mut self, follow_id: u64) {
        let Some(mut follow) = self.follows.remove(&follow_id) else {
            return;
        };

        let rejected_queries = follow.chain_head.unfollow();
        let subscription_id = follow.subscription_id.clone();
        self.close_follow(follow, rejected_queries);
        self.send_unfollow(subscription_id);
    }

    /// Detaches the subscription and rejects the queries that were in progress. The events
    /// channel closes once the frontend has pulled the events already in it.
    fn close_follow(&mut self, mut follow: Follow, rejected_queries: Vec<chain_head::QueryId>) {
        self.multiplexer.detach(&follow.subscription_id);

        for query_id in rejected_queries {
            let Some(request_id) = follow.queries.remove(&query_id) else {
                continue;
            };

            if let Some(PendingRequest::FollowQuery { result_tx, .. }) =
                self.multiplexer.cancel_request(&request_id)
            {
                let _ = result_tx.send(Err(QueryError::Rejected(
                    chain_head::QueryError::SessionEnded,
                )));
            }
        }
    }

    fn send_unfollow(&mut self, subscription_id: String) {
        self.multiplexer.start_request(
            names::CHAIN_HEAD_UNFOLLOW,
            vec![serde_json::Value::String(subscription_id)],
            PendingRequest::Detached(names::CHAIN_HEAD_UNFOLLOW),
        );
    }

    fn send_unwatch(&mut self, subscription_id: String) {
        self.multiplexer.start_request(
            names::TRANSACTION_UNWATCH,
            vec![serde_json::Value::String(subscription_id)],
            PendingRequest::Detached(names::TRANSACTION_UNWATCH),
        );
    }

    /// Fails everything in progress. Called when the connection to the server is lost.
    fn on_disconnected(&mut self) {
        if self.disconnected {
            return;
        }

        log::warn!(target: &self.log_target, "Disconnected from the JSON-RPC server");
        self.disconnected = true;

        let drained = self.multiplexer.disconnect();
        for (_, request) in drained.requests {
            request.fail_disconnected();
        }

        self.tickets.clear();

        for (_, mut follow) in self.follows.drain() {
            let _ = follow.chain_head.unfollow();
            let _ = follow.events_tx.try_send(FollowEvent::Disconnected);
        }

        for (_, watch) in self.watches.drain() {
            let _ = watch.updates_tx.try_send(WatchEvent::Disconnected);
        }
    }
}

impl PendingRequest {
    fn fail_disconnected(self) {
        match self {
            PendingRequest::Plain { result_tx, .. } => {
                let _ = result_tx.send(Err(RequestError::Disconnected));
            }
            PendingRequest::Follow { result_tx } => {
                let _ = result_tx.send(Err(RequestError::Disconnected));
            }
            PendingRequest::FollowQuery { result_tx, .. } => {
                let _ = result_tx.send(Err(QueryError::Request(RequestError::Disconnected)));
            }
            PendingRequest::Unpin {
                result_tx: Some(result_tx),
            } => {
                let _ = result_tx.send(Err(UnpinError::Request(RequestError::Disconnected)));
            }
            PendingRequest::SubmitAndWatch { result_tx } => {
                let _ = result_tx.send(Err(RequestError::Disconnected));
            }
            PendingRequest::Unpin { result_tx: None } | PendingRequest::Detached(_) => {}
        }
    }
}

/// Extracts the subscription ID from the response to a subscription request.
fn subscription_id_of(
    outcome: Result<serde_json::Value, RpcError>,
) -> Result<String, RequestError> {
    match outcome {
        Ok(serde_json::Value::String(subscription_id)) => Ok(subscription_id),
        Ok(_) => Err(RequestError::InvalidResponse),
        Err(error) => Err(RequestError::Rpc(error)),
    }
}

fn unpin_params(subscription_id: &str, hashes: &[[u8; 32]]) -> Vec<serde_json::Value> {
    vec![
        serde_json::Value::String(subscription_id.to_owned()),
        serde_json::Value::Array(hashes.iter().map(|hash| util::hex_json(hash)).collect()),
    ]
}
