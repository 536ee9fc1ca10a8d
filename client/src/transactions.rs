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


//! Frontend of a `transactionWatch_v1_submitAndWatch` subscription.

use crate::ToBackground;

use smoldot_chainhead::transaction_watch::{IncludedIn, Status, TransactionError, Update};

/// Transaction being watched.
///
/// Destroying this object stops the watch and sends a `transactionWatch_v1_unwatch` request if
/// the transaction hasn't reached a terminal state yet.
pub struct TransactionWatcher {
    watch_id: u64,
    updates_rx: async_channel::Receiver<WatchEvent>,
    to_background: async_channel::Sender<ToBackground>,
}

/// Information sent back by the background task when a watch has started.
pub(crate) struct WatchSetup {
    pub watch_id: u64,
    pub updates_rx: async_channel::Receiver<WatchEvent>,
}

impl TransactionWatcher {
    pub(crate) fn new(
        setup: WatchSetup,
        to_background: async_channel::Sender<ToBackground>,
    ) -> Self {
        TransactionWatcher {
            watch_id: setup.watch_id,
            updates_rx: setup.updates_rx,
            to_background,
        }
    }

    /// Returns the next event concerning the transaction.
    ///
    /// Exactly one terminal event ([`WatchEvent::Finalized`], [`WatchEvent::Error`] or
    /// [`WatchEvent::Disconnected`]) is reported, after which `None` is returned.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.updates_rx.recv().await.ok()
    }

    /// Stops watching the transaction. Equivalent to destroying the [`TransactionWatcher`].
    ///
    /// The transaction isn't removed from the pool of the server.
    pub fn cancel(self) {}
}

impl Drop for TransactionWatcher {
    fn drop(&mut self) {
        let _ = self.to_background.try_send(ToBackground::CancelWatch {
            watch_id: self.watch_id,
        });
    }
}

/// Event reported by a [`TransactionWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// New non-terminal status.
    Status(Status),
    /// The transaction is in a finalized block. Terminal.
    Finalized(IncludedIn),
    /// The transaction will never be included. Terminal.
    Error(TransactionError),
    /// The connection to the server has been lost. Terminal.
    Disconnected,
}

impl WatchEvent {
    /// Returns `true` if no other event follows this one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WatchEvent::Status(_))
    }
}

impl From<Update> for WatchEvent {
    fn from(update: Update) -> WatchEvent {
        match update {
            Update::Status(status) => WatchEvent::Status(status),
            Update::Finalized(included_in) => WatchEvent::Finalized(included_in),
            Update::Error(error) => WatchEvent::Error(error),
        }
    }
}
