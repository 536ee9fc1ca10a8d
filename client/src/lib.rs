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


//! Asynchronous client of the `chainHead`, `transactionWatch` and `chainSpec` families of
//! JSON-RPC functions.
//!
//! The [`Client`] is a frontend to a background task spawned through
//! [`Config::tasks_executor`]. This background task owns the connection to the JSON-RPC server,
//! in the form of two channels of JSON-encoded messages, and drives the state machines of the
//! `smoldot-chainhead` library: the [`compat::Pipeline`], the
//! [`smoldot_chainhead::json_rpc::multiplexer::Multiplexer`], one [`smoldot_chainhead::chain_head::ChainHead`] per follow
//! subscription, and one [`smoldot_chainhead::transaction_watch::TransactionWatch`] per
//! watched transaction.
//!
//! When the channel of messages coming from the server closes, every pending request fails,
//! every follow subscription ends, and every transaction watch reports
//! [`transactions::WatchEvent::Disconnected`]. The background task stops once the [`Client`]
//! and all the objects created from it have been destroyed.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use core::sync::atomic;
use futures_channel::oneshot;
use futures_util::future;
use smoldot_chainhead::{
    chain_head, compat,
    json_rpc::{methods, RpcError},
};
use std::sync::Arc;

pub mod chain_head_follow;
pub mod transactions;

mod background;
mod util;

/// Configuration for [`Client::new`].
pub struct Config {
    /// Closure that spawns background tasks.
    pub tasks_executor: Box<dyn FnMut(future::BoxFuture<'static, ()>) + Send>,

    /// Channel where JSON-encoded requests destined to the server are sent.
    pub to_server: async_channel::Sender<String>,

    /// Channel where JSON-encoded messages sent by the server are received. The server is
    /// considered disconnected when this channel closes.
    pub from_server: async_channel::Receiver<String>,

    /// Target to use when emitting logs.
    pub log_target: String,

    /// Configuration of the pipeline that repairs the deviations of the server.
    pub compat: compat::Config,

    /// Number of follow events that can be buffered for each
    /// [`chain_head_follow::FollowSubscription`] before the subscription is forcibly stopped.
    pub follow_events_capacity: usize,

    /// Seed used for the hash maps keyed by identifiers chosen by the server.
    pub randomness_seed: [u8; 32],
}

/// Handle to the background task. Can be cloned.
#[derive(Clone)]
pub struct Client {
    to_background: async_channel::Sender<ToBackground>,
    /// Source of the identifiers of [`ToBackground::Request`], shared between clones.
    next_ticket: Arc<atomic::AtomicU64>,
}

impl Client {
    /// Spawns the background task and returns a handle to it.
    pub fn new(mut config: Config) -> Self {
        // Frontend objects send messages from their `Drop` implementation, which can't wait.
        let (to_background, from_frontend) = async_channel::unbounded();

        let task = background::Background::new(background::Config {
            log_target: config.log_target,
            to_server: config.to_server,
            from_server: config.from_server,
            from_frontend,
            compat: config.compat,
            follow_events_capacity: config.follow_events_capacity,
            randomness_seed: config.randomness_seed,
        });

        (config.tasks_executor)(Box::pin(background::run(task)));

        Client {
            to_background,
            next_ticket: Arc::new(atomic::AtomicU64::new(0)),
        }
    }

    /// Sends a request to the server and waits for its response.
    ///
    /// Destroying the returned future before it finishes cancels the request. Its response is
    /// then silently discarded.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RequestError> {
        let ticket = self.next_ticket.fetch_add(1, atomic::Ordering::Relaxed);
        let (result_tx, result_rx) = oneshot::channel();

        let mut guard =
            util::CancelOnDrop::new(&self.to_background, ToBackground::CancelRequest { ticket });

        self.to_background
            .send(ToBackground::Request {
                ticket,
                method: method.into(),
                params,
                result_tx,
            })
            .await
            .map_err(|_| RequestError::Disconnected)?;

        let outcome = result_rx.await.unwrap_or(Err(RequestError::Disconnected));
        guard.disarm();
        outcome
    }

    /// Starts a `chainHead_v1_follow` subscription.
    pub async fn chain_head_follow(
        &self,
        with_runtime: bool,
    ) -> Result<chain_head_follow::FollowSubscription, RequestError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.to_background
            .send(ToBackground::Follow {
                with_runtime,
                result_tx,
            })
            .await
            .map_err(|_| RequestError::Disconnected)?;

        let setup = result_rx.await.unwrap_or(Err(RequestError::Disconnected))?;
        Ok(chain_head_follow::FollowSubscription::new(
            setup,
            self.to_background.clone(),
        ))
    }

    /// Submits a transaction with `transactionWatch_v1_submitAndWatch` and starts watching its
    /// status.
    pub async fn submit_and_watch(
        &self,
        transaction: &[u8],
    ) -> Result<transactions::TransactionWatcher, RequestError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.to_background
            .send(ToBackground::SubmitAndWatch {
                transaction: transaction.to_vec(),
                result_tx,
            })
            .await
            .map_err(|_| RequestError::Disconnected)?;

        let setup = result_rx.await.unwrap_or(Err(RequestError::Disconnected))?;
        Ok(transactions::TransactionWatcher::new(
            setup,
            self.to_background.clone(),
        ))
    }

    /// Returns the name of the chain, using `chainSpec_v1_chainName`.
    pub async fn chain_name(&self) -> Result<String, RequestError> {
        let value = self
            .request(methods::names::CHAIN_SPEC_CHAIN_NAME, Vec::new())
            .await?;
        serde_json::from_value(value).map_err(|_| RequestError::InvalidResponse)
    }

    /// Returns the hash of the genesis block, using `chainSpec_v1_genesisHash`.
    pub async fn genesis_hash(&self) -> Result<[u8; 32], RequestError> {
        let value = self
            .request(methods::names::CHAIN_SPEC_GENESIS_HASH, Vec::new())
            .await?;
        serde_json::from_value::<methods::HashHexString>(value)
            .map(|hash| hash.0)
            .map_err(|_| RequestError::InvalidResponse)
    }

    /// Returns the properties of the chain, using `chainSpec_v1_properties`.
    pub async fn chain_properties(&self) -> Result<serde_json::Value, RequestError> {
        self.request(methods::names::CHAIN_SPEC_PROPERTIES, Vec::new())
            .await
    }
}

/// Error that can happen when sending a request.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum RequestError {
    /// The server has answered with an error.
    #[display("{_0}")]
    Rpc(RpcError),
    /// The connection to the server has been lost.
    #[display("Disconnected from the JSON-RPC server")]
    Disconnected,
    /// The response sent by the server couldn't be decoded.
    #[display("Invalid response from the JSON-RPC server")]
    InvalidResponse,
}

/// Message sent from the frontend objects to the background task.
enum ToBackground {
    Request {
        ticket: u64,
        method: String,
        params: Vec<serde_json::Value>,
        result_tx: oneshot::Sender<Result<serde_json::Value, RequestError>>,
    },
    CancelRequest {
        ticket: u64,
    },
    Follow {
        with_runtime: bool,
        result_tx: oneshot::Sender<Result<chain_head_follow::FollowSetup, RequestError>>,
    },
    FollowQuery {
        follow_id: u64,
        block_hash: [u8; 32],
        kind: chain_head::QueryKind,
        /// Parameters that come after the subscription ID and the block hash.
        extra_params: Vec<serde_json::Value>,
        result_tx: oneshot::Sender<Result<serde_json::Value, chain_head_follow::QueryError>>,
    },
    Unpin {
        follow_id: u64,
        hashes: Vec<[u8; 32]>,
        result_tx: oneshot::Sender<Result<(), chain_head_follow::UnpinError>>,
    },
    Unfollow {
        follow_id: u64,
    },
    SubmitAndWatch {
        transaction: Vec<u8>,
        result_tx: oneshot::Sender<Result<transactions::WatchSetup, RequestError>>,
    },
    CancelWatch {
        watch_id: u64,
    },
}
