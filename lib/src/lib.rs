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

//! Client-side primitives for the `chainHead` and `transactionWatch` families of JSON-RPC
//! functions of Substrate-based chains.
//!
//! This library doesn't perform any I/O and doesn't spawn any task. Every component is a state
//! machine into which the API user injects the messages received from the JSON-RPC server, and
//! from which the API user pulls the messages to send to that server.
//!
//! # Overview
//!
//! - [`json_rpc::multiplexer`] correlates outgoing requests with their responses, and incoming
//! notifications with the subscription they belong to.
//! - [`compat`] contains a pipeline of stages that sit between the transport and the multiplexer
//! and that repair the various ways in which JSON-RPC servers deviate from the canonical
//! behaviour.
//! - [`chain_head`] tracks the state of a `chainHead_v1_follow` subscription: which blocks are
//! pinned, which is the best block, which is the finalized block, and which queries are in
//! progress.
//! - [`transaction_watch`] tracks the state of a `transactionWatch_v1_submitAndWatch`
//! subscription and guarantees that exactly one terminal event is reported.
//!
//! # Typical data flow
//!
//! ```text
//! transport <=> compat::Pipeline <=> json_rpc::multiplexer::Multiplexer <=> chain_head / transaction_watch
//! ```
//!

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
// TODO: the `unused_crate_dependencies` lint is disabled because of dev-dependencies, see <https://github.com/rust-lang/rust/issues/95513>
// #![deny(unused_crate_dependencies)]

extern crate alloc;

pub mod chain_head;
pub mod compat;
pub mod json_rpc;
pub mod transaction_watch;

mod util;
