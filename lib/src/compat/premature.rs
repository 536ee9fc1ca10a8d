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

//! Some servers send `bestBlockChanged` or `finalized` events that refer to blocks that haven't
//! been announced yet, or announce the same block multiple times.
//!
//! This stage defers each event that refers to an unannounced block until that block has been
//! announced, and discards duplicate `newBlock` events. Deferred `bestBlockChanged` and
//! `finalized` events are emitted in the order in which they have been received.
//!
//! Deferred events are emitted before a `stop` event. As with [`super::reorder`], the number of
//! deferred events is bounded.

use super::{Aborter, FollowSubscriptions, Stage, StageOutput};
use crate::{
    json_rpc::{methods, ClientRequest, ServerToClient},
    util::SeedSource,
};

use alloc::{collections::VecDeque, string::String};

/// See [the module-level documentation](..).
pub struct Premature {
    max_buffered_events: usize,
    subscriptions: FollowSubscriptions<Subscription>,
    aborter: Aborter,
}

#[derive(Default)]
struct Subscription {
    /// Blocks that have been announced and not pruned.
    known: hashbrown::HashSet<[u8; 32], fnv::FnvBuildHasher>,

    latest_finalized: Option<[u8; 32]>,

    /// Events waiting to be emitted, in arrival order.
    deferred: VecDeque<methods::FollowEvent>,
}

impl Premature {
    pub fn new(max_buffered_events: usize, seeds: &mut SeedSource) -> Self {
        Premature {
            max_buffered_events,
            subscriptions: FollowSubscriptions::new(seeds),
            aborter: Aborter::new("compat-premature-unfollow", seeds),
        }
    }
}

impl Stage for Premature {
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

        match event {
            methods::FollowEvent::Stop {} => {
                for event in subscription.deferred.drain(..) {
                    emit(output, &subscription_id, event);
                }
                emit(output, &subscription_id, methods::FollowEvent::Stop {});
                self.subscriptions.remove(&subscription_id);
                return;
            }
            event @ methods::FollowEvent::Initialized { .. } => {
                subscription.apply(&event);
                emit(output, &subscription_id, event);
            }
            event => subscription.deferred.push_back(event),
        }

        subscription.emit_ready(&subscription_id, output);

        if subscription.deferred.len() > self.max_buffered_events {
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
    /// Emits all the deferred events that can be emitted.
    fn emit_ready(&mut self, subscription_id: &str, output: &mut StageOutput) {
        'outer: loop {
            // `true` if a `bestBlockChanged` or `finalized` event is blocked, in which case the
            // following events of the same kind must stay behind it.
            let mut ordering_blocked = false;

            for index in 0..self.deferred.len() {
                let readiness = match &self.deferred[index] {
                    methods::FollowEvent::NewBlock {
                        block_hash,
                        parent_block_hash,
                        ..
                    } => {
                        if self.known.contains(&block_hash.0) {
                            Readiness::Duplicate
                        } else if self.known.contains(&parent_block_hash.0) {
                            Readiness::Ready
                        } else {
                            Readiness::NotReady
                        }
                    }
                    methods::FollowEvent::BestBlockChanged { best_block_hash } => {
                        if !ordering_blocked && self.known.contains(&best_block_hash.0) {
                            Readiness::Ready
                        } else {
                            ordering_blocked = true;
                            Readiness::NotReady
                        }
                    }
                    methods::FollowEvent::Finalized {
                        finalized_block_hashes,
                        ..
                    } => {
                        if !ordering_blocked
                            && finalized_block_hashes
                                .iter()
                                .all(|h| self.known.contains(&h.0))
                        {
                            Readiness::Ready
                        } else {
                            ordering_blocked = true;
                            Readiness::NotReady
                        }
                    }
                    methods::FollowEvent::Initialized { .. } | methods::FollowEvent::Stop {} => {
                        Readiness::Ready
                    }
                };

                match readiness {
                    Readiness::NotReady => continue,
                    Readiness::Duplicate => {
                        self.deferred.remove(index);
                    }
                    Readiness::Ready => {
                        let Some(event) = self.deferred.remove(index) else {
                            break 'outer;
                        };
                        self.apply(&event);
                        emit(output, subscription_id, event);
                    }
                }

                // The list of deferred events has been modified. Start again from the beginning.
                continue 'outer;
            }

            break;
        }
    }

    /// Updates the list of known blocks after an event has been emitted.
    fn apply(&mut self, event: &methods::FollowEvent) {
        match event {
            methods::FollowEvent::Initialized {
                finalized_block_hashes,
                ..
            } => {
                self.known.extend(finalized_block_hashes.iter().map(|h| h.0));
                self.latest_finalized = finalized_block_hashes.last().map(|h| h.0);
            }
            methods::FollowEvent::NewBlock { block_hash, .. } => {
                self.known.insert(block_hash.0);
            }
            methods::FollowEvent::Finalized {
                finalized_block_hashes,
                pruned_block_hashes,
            } => {
                for pruned in pruned_block_hashes {
                    self.known.remove(&pruned.0);
                }
                if let Some((latest, older)) = finalized_block_hashes.split_last() {
                    for hash in older {
                        self.known.remove(&hash.0);
                    }
                    if let Some(previous) = self.latest_finalized {
                        if previous != latest.0 {
                            self.known.remove(&previous);
                        }
                    }
                    self.latest_finalized = Some(latest.0);
                }
            }
            methods::FollowEvent::BestBlockChanged { .. } | methods::FollowEvent::Stop {} => {}
        }
    }
}

enum Readiness {
    Ready,
    NotReady,
    Duplicate,
}

fn emit(output: &mut StageOutput, subscription_id: &str, event: methods::FollowEvent) {
    output.to_client(ServerToClient::FollowEvent {
        subscription: String::from(subscription_id),
        event,
    });
}
