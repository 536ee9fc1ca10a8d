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

use super::{IncludedIn, Status, TerminalKind, TransactionError, TransactionWatch, Update};
use crate::json_rpc::methods::{HashHexString, TransactionWatchEvent, TransactionWatchEventBlock};

fn finalized() -> TransactionWatchEvent {
    TransactionWatchEvent::Finalized {
        block: TransactionWatchEventBlock {
            hash: HashHexString([5; 32]),
            index: 2,
        },
    }
}

#[test]
fn success_path() {
    let mut watch = TransactionWatch::new();
    assert_eq!(watch.status(), Some(&Status::Submitted));
    assert!(!watch.take_unwatch());

    assert_eq!(
        watch.inject_event(TransactionWatchEvent::Validated {}),
        Some(Update::Status(Status::Validated))
    );
    assert_eq!(watch.status(), Some(&Status::Validated));
    assert_eq!(
        watch.inject_event(TransactionWatchEvent::Broadcasted { num_peers: Some(3) }),
        Some(Update::Status(Status::Broadcasted { num_peers: Some(3) }))
    );
    assert_eq!(
        watch.inject_event(TransactionWatchEvent::BestChainBlockIncluded { block: None }),
        Some(Update::Status(Status::BestChainBlockIncluded { block: None }))
    );
    assert!(!watch.take_unwatch());

    assert_eq!(
        watch.inject_event(finalized()),
        Some(Update::Finalized(IncludedIn {
            block_hash: [5; 32],
            index: 2
        }))
    );
    assert!(watch.is_terminated());
    assert_eq!(watch.status(), None);
    assert!(watch.take_unwatch());
    assert!(!watch.take_unwatch());
}

#[test]
fn exactly_one_terminal() {
    let terminals = [
        finalized(),
        TransactionWatchEvent::Dropped {
            broadcasted: Some(true),
            error: "gone".into(),
        },
        TransactionWatchEvent::Invalid {
            error: "bad".into(),
        },
        TransactionWatchEvent::Error {
            error: "oops".into(),
        },
    ];

    for first in &terminals {
        let mut watch = TransactionWatch::new();
        let mut num_terminals = 0;
        let mut num_unwatch = 0;

        let events = core::iter::once(first.clone())
            .chain(terminals.iter().cloned())
            .chain(core::iter::once(TransactionWatchEvent::Validated {}));
        for event in events {
            match watch.inject_event(event) {
                Some(Update::Finalized(_)) | Some(Update::Error(_)) => num_terminals += 1,
                Some(Update::Status(_)) => panic!(),
                None => {}
            }
            if watch.take_unwatch() {
                num_unwatch += 1;
            }
        }

        assert_eq!(num_terminals, 1);
        assert_eq!(num_unwatch, 1);
    }
}

#[test]
fn error_terminal_is_typed() {
    let mut watch = TransactionWatch::new();
    let update = watch.inject_event(TransactionWatchEvent::Dropped {
        broadcasted: Some(false),
        error: "pool full".into(),
    });
    assert_eq!(
        update,
        Some(Update::Error(TransactionError {
            kind: TerminalKind::Dropped,
            message: "pool full".into(),
            broadcasted: Some(false),
        }))
    );
    assert_eq!(watch.error_kind(), Some(TerminalKind::Dropped));

    let Some(Update::Error(error)) = update else {
        panic!()
    };
    assert_eq!(error.to_string(), "Transaction dropped: pool full");
}

#[test]
fn cancel_suppresses_everything() {
    let mut watch = TransactionWatch::new();
    watch.inject_event(TransactionWatchEvent::Validated {});

    assert!(watch.cancel());
    assert!(!watch.cancel());
    assert!(watch.take_unwatch());
    assert!(!watch.take_unwatch());

    assert_eq!(watch.inject_event(finalized()), None);
    assert_eq!(watch.inject_malformed("foo"), None);
    assert!(!watch.take_unwatch());
}

#[test]
fn cancel_after_terminal() {
    let mut watch = TransactionWatch::new();
    watch.inject_event(finalized());
    assert!(!watch.cancel());
    assert!(watch.take_unwatch());
    assert!(!watch.take_unwatch());
}

#[test]
fn malformed_notification() {
    let mut watch = TransactionWatch::new();
    assert_eq!(
        watch.inject_notification(serde_json::json!({"event": "broadcasted", "numPeers": 1})),
        Some(Update::Status(Status::Broadcasted { num_peers: Some(1) }))
    );

    let update = watch.inject_notification(serde_json::json!({"event": "finalized"}));
    assert!(matches!(
        update,
        Some(Update::Error(TransactionError {
            kind: TerminalKind::Error,
            ..
        }))
    ));
    assert!(watch.take_unwatch());
    assert_eq!(watch.inject_event(finalized()), None);
}
