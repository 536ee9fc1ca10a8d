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

//! State of a `chainHead_v1_follow` subscription, as seen from the client side.
//!
//! The [`ChainHead`] doesn't send or receive anything by itself. The API user is expected to
//! call [`ChainHead::follow`] when sending a `chainHead_v1_follow` request, then pass each
//! follow event to [`ChainHead::inject_event`]. The [`ChainHead`] keeps track of which blocks
//! are pinned, which queries are in progress, and which blocks must be unpinned.
//!
//! # Pinning
//!
//! Each block announced by the server through an `initialized` or a `newBlock` event is pinned
//! once. A block is pinned until the API user unpins it through [`ChainHead::unpin`], or until
//! the server reports it as pruned in a `finalized` event, in which case the `to_unpin` field
//! of [`Notification::Finalized`] contains it. Each pin is released exactly once.
//!
//! Blocks that are finalized then superseded by a newer finalized block are *not* unpinned
//! automatically. The API user is in charge of unpinning them.
//!
//! # Generations
//!
//! Every time a new subscription is started or an existing subscription ends, the generation
//! number is incremented. Queries are bound to the generation during which they have been
//! started, and are rejected if the generation has changed in the meanwhile. This guarantees
//! that the response to a query can never be attributed to a block of a different
//! subscription.

use crate::json_rpc::methods;

use alloc::{sync::Arc, vec::Vec};


/// See [the module-level documentation](..).
#[derive(Debug)]
pub struct ChainHead {
    state: State,

    /// Incremented every time a subscription starts or stops.
    generation: u64,

    /// `true` if the `initialized` event of the current subscription has been received.
    initialized: bool,

    /// Blocks of the current subscription. Contains the pinned blocks, but also the unpinned
    /// blocks that can still be the parent of a new block.
    blocks: hashbrown::HashMap<[u8; 32], Block, fnv::FnvBuildHasher>,

    best_block: Option<[u8; 32]>,
    finalized_block: Option<[u8; 32]>,

    /// Queries of the current generation that haven't finished yet.
    queries: hashbrown::HashMap<u64, Query, fnv::FnvBuildHasher>,

    next_query_id: u64,
}

/// State of a [`ChainHead`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// [`ChainHead::follow`] has never been called.
    Unfollowed,
    /// Subscription in progress.
    Following,
    /// The previous subscription has been stopped, either by the server or through
    /// [`ChainHead::unfollow`].
    Stopped,
}

/// Information about a block.
#[derive(Debug, Clone)]
pub struct Block {
    /// Hash of the parent of this block. `None` for the blocks of the `initialized` event.
    pub parent: Option<[u8; 32]>,
    /// Number of times the block is pinned. Either 0 or 1.
    pub pin_count: u32,
    pub status: BlockStatus,
    /// Runtime in effect at this block. `None` if the subscription has been started without
    /// runtime updates.
    pub runtime: Option<Arc<methods::MaybeRuntimeSpec>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    New,
    /// Current best block.
    Best,
    Finalized,
    Pruned,
}

/// Identifier of a query started with [`ChainHead::start_query`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId {
    generation: u64,
    id: u64,
}

impl QueryId {
    /// Returns the generation of the subscription during which this query has been started.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Type of a query.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// `chainHead_v1_body`.
    Body,
    /// `chainHead_v1_call`.
    Call,
    /// `chainHead_v1_storage`.
    Storage,
    /// `chainHead_v1_header`.
    Header,
}

impl QueryKind {
    /// Returns the name of the JSON-RPC method corresponding to this query.
    pub fn method_name(&self) -> &'static str {
        match self {
            QueryKind::Body => methods::names::CHAIN_HEAD_BODY,
            QueryKind::Call => methods::names::CHAIN_HEAD_CALL,
            QueryKind::Storage => methods::names::CHAIN_HEAD_STORAGE,
            QueryKind::Header => methods::names::CHAIN_HEAD_HEADER,
        }
    }
}

#[derive(Debug, Clone)]
struct Query {
    kind: QueryKind,
}

/// Outcome of [`ChainHead::inject_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The subscription has been initialized.
    Initialized {
        /// Hashes of the finalized blocks, now pinned. The last one is the current finalized
        /// block.
        finalized_block_hashes: Vec<[u8; 32]>,
        /// Runtime of the current finalized block.
        runtime: Option<Arc<methods::MaybeRuntimeSpec>>,
    },

    /// A new block has been added to the tree and is now pinned.
    NewBlock {
        block_hash: [u8; 32],
        parent_block_hash: [u8; 32],
        /// `Some` if the runtime of this block is different from the one of its parent.
        new_runtime: Option<Arc<methods::MaybeRuntimeSpec>>,
    },

    /// The best block has changed.
    BestBlockChanged { best_block_hash: [u8; 32] },

    /// Some blocks have been finalized, and some blocks have been pruned.
    Finalized {
        finalized_block_hashes: Vec<[u8; 32]>,
        pruned_block_hashes: Vec<[u8; 32]>,
        /// Pruned blocks that were still pinned. The API user must send a
        /// `chainHead_v1_unpin` request containing these blocks. Their pin has already been
        /// released in the [`ChainHead`].
        to_unpin: Vec<[u8; 32]>,
    },

    /// The subscription has been stopped by the server. The [`ChainHead`] is now in the
    /// [`State::Stopped`] state.
    Stopped {
        /// Queries that were in progress. They must be rejected with a "session ended" error.
        rejected_queries: Vec<QueryId>,
    },

    /// The event is inconsistent with the current state. The event has been ignored.
    Inconsistency(InconsistentEvent),
}

/// Event that doesn't match the state of the [`ChainHead`].
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum InconsistentEvent {
    /// No subscription is in progress.
    #[display("Event received while not following")]
    NotFollowing,
    /// Second `initialized` event for the same subscription.
    #[display("Duplicate initialized event")]
    AlreadyInitialized,
    /// Event received before `initialized`.
    #[display("Event received before initialized")]
    NotInitialized,
    /// `newBlock` event about a block that has already been announced.
    #[display("Block 0x{} announced twice", hex::encode(_0))]
    DuplicateBlock(#[error(not(source))] [u8; 32]),
    /// Event refers to a block that hasn't been announced.
    #[display("Unknown block 0x{}", hex::encode(_0))]
    UnknownBlock(#[error(not(source))] [u8; 32]),
}

/// Error potentially returned by [`ChainHead::follow`].
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("A subscription is already in progress")]
pub struct AlreadyFollowing;

/// Error potentially returned by [`ChainHead::start_query`].
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum QueryError {
    /// The block isn't pinned.
    #[display("Block 0x{} isn't pinned", hex::encode(_0))]
    NotPinned(#[error(not(source))] [u8; 32]),
    /// The subscription has been stopped.
    #[display("Follow subscription has ended")]
    SessionEnded,
    /// [`ChainHead::follow`] has never been called.
    #[display("Not following")]
    NotFollowing,
}

/// Error returned by [`ChainHead::finish_query`] if the query belongs to a previous
/// subscription or has already been finished or aborted.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("Follow subscription has ended")]
pub struct SessionEnded;

/// Error potentially returned by [`ChainHead::unpin`].
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum UnpinError {
    /// The block isn't pinned. It might have already been unpinned.
    #[display("Block 0x{} isn't pinned", hex::encode(_0))]
    NotPinned(#[error(not(source))] [u8; 32]),
    /// The same block appears multiple times in the list.
    #[display("Block 0x{} appears multiple times", hex::encode(_0))]
    Duplicate(#[error(not(source))] [u8; 32]),
    /// The subscription has been stopped.
    #[display("Follow subscription has ended")]
    SessionEnded,
    /// [`ChainHead::follow`] has never been called.
    #[display("Not following")]
    NotFollowing,
}

impl ChainHead {
    /// Initializes a new [`ChainHead`] in the [`State::Unfollowed`] state.
    pub fn new() -> Self {
        ChainHead {
            state: State::Unfollowed,
            generation: 0,
            initialized: false,
            blocks: hashbrown::HashMap::with_capacity_and_hasher(16, Default::default()),
            best_block: None,
            finalized_block: None,
            queries: hashbrown::HashMap::with_capacity_and_hasher(4, Default::default()),
            next_query_id: 0,
        }
    }

    /// Starts a new subscription. Must be called when sending a `chainHead_v1_follow` request.
    ///
    /// All the state of the previous subscription, if any, is discarded.
    pub fn follow(&mut self) -> Result<(), AlreadyFollowing> {
        if self.state == State::Following {
            return Err(AlreadyFollowing);
        }

        self.state = State::Following;
        self.generation += 1;
        self.initialized = false;
        self.blocks.clear();
        self.best_block = None;
        self.finalized_block = None;
        self.queries.clear();
        Ok(())
    }

    /// Stops the current subscription. The API user must send a `chainHead_v1_unfollow`
    /// request.
    ///
    /// Returns the queries that were in progress. They must be rejected.
    ///
    /// Does nothing and returns an empty list if no subscription is in progress.
    pub fn unfollow(&mut self) -> Vec<QueryId> {
        if self.state != State::Following {
            return Vec::new();
        }

        self.end_session()
    }

    /// Updates the state of the [`ChainHead`] with an event generated by the server.
    pub fn inject_event(&mut self, event: methods::FollowEvent) -> Notification {
        if self.state != State::Following {
            return Notification::Inconsistency(InconsistentEvent::NotFollowing);
        }

        match event {
            methods::FollowEvent::Initialized {
                finalized_block_hashes,
                finalized_block_runtime,
            } => {
                if self.initialized {
                    return Notification::Inconsistency(InconsistentEvent::AlreadyInitialized);
                }
                self.initialized = true;

                let runtime = finalized_block_runtime.map(Arc::new);
                let finalized_block_hashes = finalized_block_hashes
                    .into_iter()
                    .map(|h| h.0)
                    .collect::<Vec<_>>();

                for hash in &finalized_block_hashes {
                    self.blocks.insert(
                        *hash,
                        Block {
                            parent: None,
                            pin_count: 1,
                            status: BlockStatus::Finalized,
                            runtime: runtime.clone(),
                        },
                    );
                }

                self.finalized_block = finalized_block_hashes.last().copied();
                self.best_block = self.finalized_block;

                Notification::Initialized {
                    finalized_block_hashes,
                    runtime,
                }
            }

            _ if !self.initialized => {
                if let methods::FollowEvent::Stop {} = event {
                    let rejected_queries = self.end_session();
                    return Notification::Stopped { rejected_queries };
                }
                Notification::Inconsistency(InconsistentEvent::NotInitialized)
            }

            methods::FollowEvent::NewBlock {
                block_hash,
                parent_block_hash,
                new_runtime,
            } => {
                if self.blocks.contains_key(&block_hash.0) {
                    return Notification::Inconsistency(InconsistentEvent::DuplicateBlock(
                        block_hash.0,
                    ));
                }

                let parent_runtime = self
                    .blocks
                    .get(&parent_block_hash.0)
                    .and_then(|b| b.runtime.clone());

                let (runtime, new_runtime) = match new_runtime {
                    Some(rt) if parent_runtime.as_deref() != Some(&rt) => {
                        let rt = Arc::new(rt);
                        (Some(rt.clone()), Some(rt))
                    }
                    _ => (parent_runtime, None),
                };

                // The block is pinned on the server side even if its parent is unknown.
                self.blocks.insert(
                    block_hash.0,
                    Block {
                        parent: Some(parent_block_hash.0),
                        pin_count: 1,
                        status: BlockStatus::New,
                        runtime,
                    },
                );

                Notification::NewBlock {
                    block_hash: block_hash.0,
                    parent_block_hash: parent_block_hash.0,
                    new_runtime,
                }
            }

            methods::FollowEvent::BestBlockChanged { best_block_hash } => {
                match self.blocks.get(&best_block_hash.0) {
                    Some(block) if block.status != BlockStatus::Pruned => {}
                    _ => {
                        return Notification::Inconsistency(InconsistentEvent::UnknownBlock(
                            best_block_hash.0,
                        ))
                    }
                }

                if let Some(previous) = self.best_block.take() {
                    if let Some(block) = self.blocks.get_mut(&previous) {
                        if block.status == BlockStatus::Best {
                            block.status = BlockStatus::New;
                        }
                    }
                }

                if let Some(block) = self.blocks.get_mut(&best_block_hash.0) {
                    if block.status == BlockStatus::New {
                        block.status = BlockStatus::Best;
                    }
                }

                self.best_block = Some(best_block_hash.0);
                Notification::BestBlockChanged {
                    best_block_hash: best_block_hash.0,
                }
            }

            methods::FollowEvent::Finalized {
                finalized_block_hashes,
                pruned_block_hashes,
            } => {
                let finalized_block_hashes = finalized_block_hashes
                    .into_iter()
                    .map(|h| h.0)
                    .collect::<Vec<_>>();
                let pruned_block_hashes = pruned_block_hashes
                    .into_iter()
                    .map(|h| h.0)
                    .collect::<Vec<_>>();

                // Unknown blocks in either list are ignored. They can't be pinned.
                for hash in &finalized_block_hashes {
                    if let Some(block) = self.blocks.get_mut(hash) {
                        block.status = BlockStatus::Finalized;
                    }
                }

                let mut to_unpin = Vec::with_capacity(pruned_block_hashes.len());
                for hash in &pruned_block_hashes {
                    let Some(block) = self.blocks.get_mut(hash) else {
                        continue;
                    };
                    block.status = BlockStatus::Pruned;
                    if block.pin_count > 0 {
                        block.pin_count -= 1;
                        to_unpin.push(*hash);
                    }
                }

                if let Some(new_finalized) = finalized_block_hashes.last() {
                    self.finalized_block = Some(*new_finalized);
                }

                // Pruned blocks are removed here.
                self.purge_unpinned();

                if self
                    .best_block
                    .is_some_and(|best| !self.blocks.contains_key(&best))
                {
                    self.best_block = self.finalized_block;
                }

                Notification::Finalized {
                    finalized_block_hashes,
                    pruned_block_hashes,
                    to_unpin,
                }
            }

            methods::FollowEvent::Stop {} => {
                let rejected_queries = self.end_session();
                Notification::Stopped { rejected_queries }
            }
        }
    }

    /// Starts a query against the given block. Must be called before sending a
    /// `chainHead_v1_body`, `chainHead_v1_call`, `chainHead_v1_storage` or
    /// `chainHead_v1_header` request.
    pub fn start_query(
        &mut self,
        block_hash: &[u8; 32],
        kind: QueryKind,
    ) -> Result<QueryId, QueryError> {
        match self.state {
            State::Unfollowed => return Err(QueryError::NotFollowing),
            State::Stopped => return Err(QueryError::SessionEnded),
            State::Following => {}
        }

        if !self.is_pinned(block_hash) {
            return Err(QueryError::NotPinned(*block_hash));
        }

        let id = self.next_query_id;
        self.next_query_id += 1;
        self.queries.insert(id, Query { kind });

        Ok(QueryId {
            generation: self.generation,
            id,
        })
    }

    /// Must be called when the response to a query has been received.
    ///
    /// Returns an error if the subscription the query belongs to has ended, in which case the
    /// response must be discarded.
    pub fn finish_query(&mut self, query_id: QueryId) -> Result<QueryKind, SessionEnded> {
        if query_id.generation != self.generation {
            return Err(SessionEnded);
        }

        self.queries
            .remove(&query_id.id)
            .map(|q| q.kind)
            .ok_or(SessionEnded)
    }

    /// Forgets about a query. Returns `false` if the query wasn't in progress.
    pub fn abort_query(&mut self, query_id: QueryId) -> bool {
        query_id.generation == self.generation && self.queries.remove(&query_id.id).is_some()
    }

    /// Returns the number of queries in progress.
    pub fn num_queries(&self) -> usize {
        self.queries.len()
    }

    /// Releases the pin of the given blocks.
    ///
    /// On success, returns the list of hashes to put in the `chainHead_v1_unpin` request.
    /// On error, nothing is modified.
    pub fn unpin(&mut self, hashes: &[[u8; 32]]) -> Result<Vec<[u8; 32]>, UnpinError> {
        match self.state {
            State::Unfollowed => return Err(UnpinError::NotFollowing),
            State::Stopped => return Err(UnpinError::SessionEnded),
            State::Following => {}
        }

        for (index, hash) in hashes.iter().enumerate() {
            if hashes[..index].contains(hash) {
                return Err(UnpinError::Duplicate(*hash));
            }
            if !self.is_pinned(hash) {
                return Err(UnpinError::NotPinned(*hash));
            }
        }

        for hash in hashes {
            if let Some(block) = self.blocks.get_mut(hash) {
                block.pin_count -= 1;
            }
        }

        self.purge_unpinned();
        Ok(hashes.to_vec())
    }

    /// Returns the list of blocks that are currently pinned.
    pub fn pinned_blocks(&self) -> impl Iterator<Item = &[u8; 32]> {
        self.blocks
            .iter()
            .filter(|(_, b)| b.pin_count > 0)
            .map(|(h, _)| h)
    }

    /// Returns `true` if the given block is pinned.
    pub fn is_pinned(&self, hash: &[u8; 32]) -> bool {
        self.blocks.get(hash).is_some_and(|b| b.pin_count > 0)
    }

    /// Returns information about a block of the current subscription, or `None` if unknown.
    ///
    /// Blocks that have been unpinned might still be known.
    pub fn block(&self, hash: &[u8; 32]) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn best_block(&self) -> Option<&[u8; 32]> {
        self.best_block.as_ref()
    }

    pub fn finalized_block(&self) -> Option<&[u8; 32]> {
        self.finalized_block.as_ref()
    }

    /// Returns the runtime in effect at the given block.
    pub fn runtime_at(&self, hash: &[u8; 32]) -> Option<&Arc<methods::MaybeRuntimeSpec>> {
        self.blocks.get(hash)?.runtime.as_ref()
    }

    /// Returns the current generation number. See [the module-level documentation](..).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn end_session(&mut self) -> Vec<QueryId> {
        let generation = self.generation;
        let rejected = self
            .queries
            .drain()
            .map(|(id, _)| QueryId { generation, id })
            .collect();

        self.state = State::Stopped;
        self.generation += 1;
        self.blocks.clear();
        self.best_block = None;
        self.finalized_block = None;
        rejected
    }

    /// Removes the unpinned blocks that can't be the parent of a new block anymore.
    fn purge_unpinned(&mut self) {
        let finalized_block = self.finalized_block;
        self.blocks.retain(|hash, block| {
            block.pin_count > 0
                || match block.status {
                    BlockStatus::New | BlockStatus::Best => true,
                    BlockStatus::Finalized => Some(*hash) == finalized_block,
                    BlockStatus::Pruned => false,
                }
        });
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::new()
    }
}
