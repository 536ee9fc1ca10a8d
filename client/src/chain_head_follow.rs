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


//! Frontend of a `chainHead_v1_follow` subscription.
//!
//! The blocks reported through [`FollowEvent::Initialized`] and [`FollowEvent::NewBlock`] are
//! pinned by the server, and must be unpinned with [`FollowSubscription::unpin`] once they are no
//! longer needed. Blocks reported as pruned in [`FollowEvent::Finalized`] are unpinned
//! automatically.

use crate::{util, RequestError, ToBackground};

use futures_channel::oneshot;
use smoldot_chainhead::{chain_head, json_rpc::methods};
use std::sync::Arc;

/// Active `chainHead_v1_follow` subscription.
///
/// Destroying this object sends a `chainHead_v1_unfollow` request.
pub struct FollowSubscription {
    follow_id: u64,
    events_rx: async_channel::Receiver<FollowEvent>,
    to_background: async_channel::Sender<ToBackground>,
}

/// Information sent back by the background task when a subscription has started.
pub(crate) struct FollowSetup {
    pub follow_id: u64,
    pub events_rx: async_channel::Receiver<FollowEvent>,
}

impl FollowSubscription {
    pub(crate) fn new(
        setup: FollowSetup,
        to_background: async_channel::Sender<ToBackground>,
    ) -> Self {
        FollowSubscription {
            follow_id: setup.follow_id,
            events_rx: setup.events_rx,
            to_background,
        }
    }

    /// Returns the next event of the subscription.
    ///
    /// [`FollowEvent::Stop`] and [`FollowEvent::Disconnected`] are always the last event. If
    /// the events aren't pulled quickly enough, the subscription is stopped and its events might
    /// end without either of them. `None` is returned once the subscription has ended, and a
    /// new subscription must then be started.
    pub async fn next_event(&mut self) -> Option<FollowEvent> {
        self.events_rx.recv().await.ok()
    }

    /// Returns the SCALE-encoded header of the given block, or `None` if the server doesn't
    /// know it.
    pub async fn header(&self, block_hash: &[u8; 32]) -> Result<Option<Vec<u8>>, QueryError> {
        let value = self
            .query(block_hash, chain_head::QueryKind::Header, Vec::new())
            .await?;
        serde_json::from_value::<Option<methods::HexString>>(value)
            .map(|header| header.map(|h| h.0))
            .map_err(|_| QueryError::Request(RequestError::InvalidResponse))
    }

    /// Returns the list of SCALE-encoded extrinsics of the given block.
    pub async fn body(&self, block_hash: &[u8; 32]) -> Result<Vec<Vec<u8>>, QueryError> {
        let value = self
            .query(block_hash, chain_head::QueryKind::Body, Vec::new())
            .await?;
        serde_json::from_value::<Vec<methods::HexString>>(value)
            .map(|body| body.into_iter().map(|extrinsic| extrinsic.0).collect())
            .map_err(|_| QueryError::Request(RequestError::InvalidResponse))
    }

    /// Performs a runtime call against the given block and returns its SCALE-encoded output.
    pub async fn call(
        &self,
        block_hash: &[u8; 32],
        function: &str,
        call_parameters: &[u8],
    ) -> Result<Vec<u8>, QueryError> {
        let value = self
            .query(
                block_hash,
                chain_head::QueryKind::Call,
                vec![
                    serde_json::Value::String(function.to_owned()),
                    util::hex_json(call_parameters),
                ],
            )
            .await?;
        serde_json::from_value::<methods::HexString>(value)
            .map(|output| output.0)
            .map_err(|_| QueryError::Request(RequestError::InvalidResponse))
    }

    /// Performs a storage query against the given block.
    ///
    /// A response that contains none of the lists of a [`methods::StorageResult`], such as the
    /// `limitReached` reply of some servers, is reported as [`RequestError::InvalidResponse`].
    pub async fn storage(
        &self,
        block_hash: &[u8; 32],
        items: Vec<methods::StorageQueryItem>,
        child_trie: Option<&[u8]>,
    ) -> Result<methods::StorageResult, QueryError> {
        // Serializing these types can't fail.
        let items = serde_json::to_value(items).unwrap_or_else(|_| unreachable!());
        let child_trie = child_trie.map_or(serde_json::Value::Null, util::hex_json);

        let value = self
            .query(
                block_hash,
                chain_head::QueryKind::Storage,
                vec![items, child_trie],
            )
            .await?;
        serde_json::from_value::<methods::StorageResult>(value)
            .map_err(|_| QueryError::Request(RequestError::InvalidResponse))
    }

    /// Unpins the given blocks.
    ///
    /// The call fails as a whole, without unpinning anything, if one of the blocks isn't
    /// currently pinned or appears multiple times.
    pub async fn unpin(&self, block_hashes: &[[u8; 32]]) -> Result<(), UnpinError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.to_background
            .send(ToBackground::Unpin {
                follow_id: self.follow_id,
                hashes: block_hashes.to_vec(),
                result_tx,
            })
            .await
            .map_err(|_| UnpinError::Request(RequestError::Disconnected))?;

        result_rx
            .await
            .unwrap_or(Err(UnpinError::Request(RequestError::Disconnected)))
    }

    /// Stops the subscription. Equivalent to destroying the [`FollowSubscription`].
    pub fn unfollow(self) {}

    async fn query(
        &self,
        block_hash: &[u8; 32],
        kind: chain_head::QueryKind,
        extra_params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, QueryError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.to_background
            .send(ToBackground::FollowQuery {
                follow_id: self.follow_id,
                block_hash: *block_hash,
                kind,
                extra_params,
                result_tx,
            })
            .await
            .map_err(|_| QueryError::Request(RequestError::Disconnected))?;

        result_rx
            .await
            .unwrap_or(Err(QueryError::Request(RequestError::Disconnected)))
    }
}

impl Drop for FollowSubscription {
    fn drop(&mut self) {
        let _ = self.to_background.try_send(ToBackground::Unfollow {
            follow_id: self.follow_id,
        });
    }
}

/// Event reported by a [`FollowSubscription`].
///
/// Events are reported in causal order: a block is always reported after its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowEvent {
    /// First event of the subscription.
    Initialized {
        /// Finalized blocks, now pinned. The last one is the current finalized block.
        finalized_block_hashes: Vec<[u8; 32]>,
        /// Runtime of the current finalized block, if the subscription was started with
        /// `with_runtime` equal to `true`.
        runtime: Option<Arc<methods::MaybeRuntimeSpec>>,
    },
    /// New block, now pinned.
    NewBlock {
        block_hash: [u8; 32],
        parent_block_hash: [u8; 32],
        /// `Some` if the runtime of the block differs from the one of its parent.
        new_runtime: Option<Arc<methods::MaybeRuntimeSpec>>,
    },
    BestBlockChanged {
        best_block_hash: [u8; 32],
    },
    Finalized {
        finalized_block_hashes: Vec<[u8; 32]>,
        /// Blocks that will never be finalized. They have been unpinned automatically.
        pruned_block_hashes: Vec<[u8; 32]>,
    },
    /// The server has stopped the subscription. No event follows.
    Stop,
    /// The connection to the server has been lost. No event follows.
    Disconnected,
}

/// Error that can happen when querying a block.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum QueryError {
    /// The query can't be performed in the current state of the subscription, or the
    /// subscription has ended while the query was in progress.
    #[display("{_0}")]
    Rejected(chain_head::QueryError),
    #[display("{_0}")]
    Request(RequestError),
}

/// Error that can happen when unpinning blocks.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
pub enum UnpinError {
    #[display("{_0}")]
    Rejected(chain_head::UnpinError),
    #[display("{_0}")]
    Request(RequestError),
}
