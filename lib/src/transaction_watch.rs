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

//! State of a `transactionWatch_v1_submitAndWatch` subscription.
//!
//! A transaction goes through the following states:
//!
//! ```text
//! submitted -> validated -> broadcasted -> bestChainBlockIncluded -> finalized
//! ```
//!
//! Non-terminal events can be received zero or more times and in any order. The `finalized`
//! event, and the `dropped`, `invalid`, and `error` events, are terminal. The
//! [`TransactionWatch`] guarantees that exactly one terminal [`Update`] is ever reported,
//! unless [`TransactionWatch::cancel`] is called first, in which case no update is reported
//! anymore.
//!
//! After a terminal event or a cancellation, the API user must send a
//! `transactionWatch_v1_unwatch` request. [`TransactionWatch::take_unwatch`] returns `true`
//! exactly once in order to indicate when to do so.

use crate::json_rpc::methods;

use alloc::string::{String, ToString as _};

mod tests;

/// See [the module-level documentation](..).
#[derive(Debug, Clone)]
pub struct TransactionWatch {
    state: State,
    /// `true` if [`TransactionWatch::take_unwatch`] has returned `true`.
    unwatch_taken: bool,
}

#[derive(Debug, Clone)]
enum State {
    InProgress(Status),
    Finalized,
    Failed(TerminalKind),
    Cancelled,
}

/// Non-terminal status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// No event has been received yet.
    Submitted,
    /// The transaction is valid.
    Validated,
    /// The transaction has been broadcasted to other nodes.
    Broadcasted {
        /// Number of peers the transaction has been sent to, if reported.
        num_peers: Option<u32>,
    },
    /// The transaction is in a block of the best chain, or not anymore if `None`.
    BestChainBlockIncluded { block: Option<IncludedIn> },
}

/// Location of a transaction in a block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IncludedIn {
    pub block_hash: [u8; 32],
    /// Index of the transaction within the body of the block.
    pub index: u64,
}

impl From<methods::TransactionWatchEventBlock> for IncludedIn {
    fn from(block: methods::TransactionWatchEventBlock) -> IncludedIn {
        IncludedIn {
            block_hash: block.hash.0,
            index: block.index,
        }
    }
}

/// Outcome of [`TransactionWatch::inject_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// New non-terminal status.
    Status(Status),
    /// The transaction has been included in a finalized block. Terminal.
    Finalized(IncludedIn),
    /// The transaction will never be included. Terminal.
    Error(TransactionError),
}

/// Terminal error of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("Transaction {kind}: {message}")]
pub struct TransactionError {
    pub kind: TerminalKind,
    /// Message reported by the server.
    pub message: String,
    /// For [`TerminalKind::Dropped`], whether the transaction had been broadcasted.
    pub broadcasted: Option<bool>,
}

/// Kind of terminal error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, derive_more::Display)]
pub enum TerminalKind {
    /// The server has stopped tracking the transaction.
    #[display("dropped")]
    Dropped,
    /// The transaction is invalid.
    #[display("invalid")]
    Invalid,
    /// The server has encountered an error while tracking the transaction, or the
    /// notification couldn't be decoded.
    #[display("error")]
    Error,
}

impl TransactionWatch {
    /// Initializes a new [`TransactionWatch`] in the "submitted" state.
    pub fn new() -> Self {
        TransactionWatch {
            state: State::InProgress(Status::Submitted),
            unwatch_taken: false,
        }
    }

    /// Updates the state with an event generated by the server.
    ///
    /// Returns `None` if the transaction has already reached a terminal state or has been
    /// cancelled.
    pub fn inject_event(&mut self, event: methods::TransactionWatchEvent) -> Option<Update> {
        let State::InProgress(status) = &mut self.state else {
            return None;
        };

        match event {
            methods::TransactionWatchEvent::Validated {} => {
                *status = Status::Validated;
                Some(Update::Status(status.clone()))
            }
            methods::TransactionWatchEvent::Broadcasted { num_peers } => {
                *status = Status::Broadcasted { num_peers };
                Some(Update::Status(status.clone()))
            }
            methods::TransactionWatchEvent::BestChainBlockIncluded { block } => {
                *status = Status::BestChainBlockIncluded {
                    block: block.map(IncludedIn::from),
                };
                Some(Update::Status(status.clone()))
            }
            methods::TransactionWatchEvent::Finalized { block } => {
                self.state = State::Finalized;
                Some(Update::Finalized(block.into()))
            }
            methods::TransactionWatchEvent::Dropped { broadcasted, error } => {
                Some(self.fail(TerminalKind::Dropped, error, broadcasted))
            }
            methods::TransactionWatchEvent::Invalid { error } => {
                Some(self.fail(TerminalKind::Invalid, error, None))
            }
            methods::TransactionWatchEvent::Error { error } => {
                Some(self.fail(TerminalKind::Error, error, None))
            }
        }
    }

    /// Updates the state with the `result` field of a `transactionWatch_v1_watchEvent`
    /// notification. Notifications that can't be decoded are an `error` terminal event.
    pub fn inject_notification(&mut self, result: serde_json::Value) -> Option<Update> {
        match serde_json::from_value::<methods::TransactionWatchEvent>(result) {
            Ok(event) => self.inject_event(event),
            Err(error) => self.inject_malformed(error.to_string()),
        }
    }

    /// Reports an undecodable notification. The transaction moves to the `error` terminal
    /// state.
    pub fn inject_malformed(&mut self, message: impl Into<String>) -> Option<Update> {
        if !matches!(self.state, State::InProgress(_)) {
            return None;
        }

        Some(self.fail(TerminalKind::Error, message.into(), None))
    }

    /// Stops reporting updates. The unwatch request becomes due immediately.
    ///
    /// Returns `false` if the transaction had already reached a terminal state or had already
    /// been cancelled, in which case this function has no effect.
    pub fn cancel(&mut self) -> bool {
        if !matches!(self.state, State::InProgress(_)) {
            return false;
        }

        self.state = State::Cancelled;
        true
    }

    /// Returns `true` if the API user must now send a `transactionWatch_v1_unwatch` request.
    ///
    /// Returns `true` at most once.
    pub fn take_unwatch(&mut self) -> bool {
        if self.unwatch_taken || matches!(self.state, State::InProgress(_)) {
            return false;
        }

        self.unwatch_taken = true;
        true
    }

    /// Returns `true` if a terminal event has been reported or if the watch has been cancelled.
    pub fn is_terminated(&self) -> bool {
        !matches!(self.state, State::InProgress(_))
    }

    /// Returns the latest non-terminal status, or `None` if terminated.
    pub fn status(&self) -> Option<&Status> {
        match &self.state {
            State::InProgress(status) => Some(status),
            _ => None,
        }
    }

    /// Returns the kind of terminal error, if the transaction has failed.
    pub fn error_kind(&self) -> Option<TerminalKind> {
        match self.state {
            State::Failed(kind) => Some(kind),
            _ => None,
        }
    }

    fn fail(&mut self, kind: TerminalKind, message: String, broadcasted: Option<bool>) -> Update {
        self.state = State::Failed(kind);
        Update::Error(TransactionError {
            kind,
            message,
            broadcasted,
        })
    }
}

impl Default for TransactionWatch {
    fn default() -> Self {
        Self::new()
    }
}
