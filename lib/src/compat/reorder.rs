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

//! Some servers send the `newBlock` event of a block before the `newBlock` event of its parent,
//! or send events before the `initialized` event.
//!
//! This stage buffers a `newBlock` event until the block's parent has been announced, and
//! buffers all the events received before `initialized`. When a `stop` event is received, all
//! the buffered events are emitted in the order in which they have been received, followed with
//! the `stop` event.
//!
//! The number of buffered events per subscription is bounded. If the bound is exceeded, the
//! buffered events are discarded, a `stop` event is generated, and the subscription is
//! unfollowed.

use super::{Aborter, FollowSubscriptions, Stage, StageOutput};
use crate::{
    json_rpc::{methods, ClientRequest, ServerToClient},
    util::SeedSource,
};

use alloc::{string::String, vec::Vec};

/// See [the module-level documentation](..).
pub struct Reorder {
    max_buffered_events: usize,
    subscriptions: FollowSubscriptions<Subscription>,
    aborter: Aborter,
}

#[derive(Default)]
struct Subscription {
    /// `true` if the `initialized` event has been emitted.
    initialized: bool,

    /// Hashes of the blocks that have been announced and that can be the parent of a new block.
    announced: hashbrown::HashSet<[u8; 32], fnv::FnvBuildHasher>,

    /// Latest finalized block that has been emitted.
    latest_finalized: Option<[u8; 32]>,

    /// Events received before `initialized`, with their arrival number.
    before_initialized: Vec<(u64, methods::FollowEvent)>,

    /// `newBlock` events whose parent hasn't been announced yet, indexed by parent hash.
    waiting_parent: hashbrown::HashMap<
        [u8; 32],
        smallvec::SmallVec<[(u64, methods::FollowEvent); 1]>,
        fnv::FnvBuildHasher,
    >,

    /// Number of events in [`Subscription::before_initialized`] and
    /// [`Subscription::waiting_parent`].
    num_buffered: usize,

    /// Arrival number to assign to the next event.
    next_arrival: u64,
}

impl Reorder {
    pub fn new(max_buffered_events: usize, seeds: &mut SeedSource) -> Self {
        Reorder {
            max_buffered_events,
            subscriptions: FollowSubscriptions::new(seeds),
            aborter: Aborter::new("compat-reorder-unfollow", seeds),
        }
    }
}

impl Stage for Reorder {
    fn server_to_client(&mut self, message: ServerToClient, output: &mut StageOutput) {
        if self.aborter.swallow_response(&message) {
            return;
        }

        self.subscriptions
            .inspect_response(&message, Subscription::default);

        let ServerToClient::FollowEvent {
            subscription: subscription_id,
            event,
        } = message
        else {
            output.to_client(message);
            return;
        };

        if self.aborter.is_aborted(&subscription_id) {
            return;
        }

        let Some(subscription) = self.subscriptions.get_mut(&subscription_id) else {
            output.to_client(ServerToClient::FollowEvent {
                subscription: subscription_id,
                event,
            });
            return;
        };

        let arrival = subscription.next_arrival;
        subscription.next_arrival += 1;

        match event {
            methods::FollowEvent::Stop {} => {
                for event in subscription.drain_buffered() {
                    emit(output, &subscription_id, event);
                }
                emit(output, &subscription_id, methods::FollowEvent::Stop {});
                self.subscriptions.remove(&subscription_id);
            }
            event @ methods::FollowEvent::Initialized { .. } if !subscription.initialized => {
                subscription.initialized = true;
                subscription.process(&subscription_id, event, output);

                let before = core::mem::take(&mut subscription.before_initialized);
                subscription.num_buffered -= before.len();
                for (arrival, event) in before {
                    subscription.process_or_buffer(&subscription_id, arrival, event, output);
                }
            }
            event if !subscription.initialized => {
                subscription.before_initialized.push((arrival, event));
                subscription.num_buffered += 1;
            }
            event => {
                subscription.process_or_buffer(&subscription_id, arrival, event, output);
            }
        }

        let max_buffered_events = self.max_buffered_events;
        let overflow = self
            .subscriptions
            .get_mut(&subscription_id)
            .is_some_and(|s| s.num_buffered > max_buffered_events);
        if overflow {
            self.subscriptions.remove(&subscription_id);
            self.aborter.abort(
                &subscription_id,
                methods::names::CHAIN_HEAD_UNFOLLOW,
                output,
            );
        }
    }

    fn client_to_server(&mut self, request: ClientRequest, output: &mut StageOutput) {
        self.subscriptions.inspect_request(&request);
        output.to_server(request);
    }
}

impl Subscription {
    /// Emits the event now if possible, otherwise buffers it.
    fn process_or_buffer(
        &mut self,
        subscription_id: &str,
        arrival: u64,
        event: methods::FollowEvent,
        output: &mut StageOutput,
    ) {
        if let methods::FollowEvent::NewBlock {
            parent_block_hash, ..
        } = &event
        {
            if !self.announced.contains(&parent_block_hash.0) {
                self.waiting_parent
                    .entry(parent_block_hash.0)
                    .or_default()
                    .push((arrival, event));
                self.num_buffered += 1;
                return;
            }
        }

        self.process(subscription_id, event, output);
    }

    /// Emits the event, then the buffered events that it unblocks.
    fn process(
        &mut self,
        subscription_id: &str,
        event: methods::FollowEvent,
        output: &mut StageOutput,
    ) {
        let mut to_emit = Vec::with_capacity(1);
        to_emit.push(event);

        while let Some(event) = to_emit.pop() {
            match &event {
                methods::FollowEvent::Initialized {
                    finalized_block_hashes,
                    ..
                } => {
                    self.announced
                        .extend(finalized_block_hashes.iter().map(|h| h.0));
                    self.latest_finalized = finalized_block_hashes.last().map(|h| h.0);
                }
                methods::FollowEvent::NewBlock { block_hash, .. } => {
                    self.announced.insert(block_hash.0);
                    if let Some(children) = self.waiting_parent.remove(&block_hash.0) {
                        self.num_buffered -= children.len();
                        // Popped from the end, so pushed in reverse in order to keep the
                        // arrival order between siblings.
                        to_emit.extend(children.into_iter().rev().map(|(_, ev)| ev));
                    }
                }
                methods::FollowEvent::Finalized {
                    finalized_block_hashes,
                    pruned_block_hashes,
                } => {
                    for pruned in pruned_block_hashes {
                        self.announced.remove(&pruned.0);
                    }
                    if let Some((latest, older)) = finalized_block_hashes.split_last() {
                        for hash in older {
                            self.announced.remove(&hash.0);
                        }
                        if let Some(previous) = self.latest_finalized {
                            if previous != latest.0 {
                                self.announced.remove(&previous);
                            }
                        }
                        self.latest_finalized = Some(latest.0);
                    }
                }
                methods::FollowEvent::BestBlockChanged { .. } | methods::FollowEvent::Stop {} => {}
            }

            emit(output, subscription_id, event);
        }
    }

    /// Removes all the buffered events and returns them in their arrival order.
    fn drain_buffered(&mut self) -> impl Iterator<Item = methods::FollowEvent> {
        let mut buffered = core::mem::take(&mut self.before_initialized);
        buffered.extend(self.waiting_parent.drain().flat_map(|(_, events)| events));
        buffered.sort_by_key(|(arrival, _)| *arrival);
        self.num_buffered = 0;
        buffered.into_iter().map(|(_, event)| event)
    }
}

fn emit(output: &mut StageOutput, subscription_id: &str, event: methods::FollowEvent) {
    output.to_client(ServerToClient::FollowEvent {
        subscription: String::from(subscription_id),
        event,
    });
}
