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


use core::fmt::{self, Write as _};

/// Returns an opaque object implementing the `fmt::Display` trait. Truncates the given `input`
/// to `limit` characters, and adds an ellipsis if the input was truncated.
pub fn truncated_str<'a>(
    input: impl Iterator<Item = char> + Clone + 'a,
    limit: usize,
) -> impl fmt::Display + 'a {
    struct Iter<I>(I, usize);

    impl<I: Iterator<Item = char> + Clone> fmt::Display for Iter<I> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let mut counter = 0;
            for c in self.0.clone() {
                if counter >= self.1 {
                    f.write_char('…')?;
                    break;
                }

                f.write_char(c)?;
                counter += 1;
            }

            Ok(())
        }
    }

    Iter(input, limit)
}

/// Shortcut for [`truncated_str`] applied to a JSON-RPC message, with control characters
/// removed.
pub fn log_message(message: &str) -> impl fmt::Display + '_ {
    truncated_str(message.chars().filter(|c| !c.is_control()), 250)
}

/// Encodes bytes as a `0x`-prefixed JSON string.
pub fn hex_json(bytes: &[u8]) -> serde_json::Value {
    serde_json::Value::String(format!("0x{}", hex::encode(bytes)))
}

/// Sends a message to the background task when destroyed, unless [`CancelOnDrop::disarm`] has
/// been called.
pub struct CancelOnDrop<'a, T> {
    channel: &'a async_channel::Sender<T>,
    message: Option<T>,
}

impl<'a, T> CancelOnDrop<'a, T> {
    pub fn new(channel: &'a async_channel::Sender<T>, message: T) -> Self {
        CancelOnDrop {
            channel,
            message: Some(message),
        }
    }

    pub fn disarm(&mut self) {
        self.message = None;
    }
}

impl<'a, T> Drop for CancelOnDrop<'a, T> {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            // The channel is unbounded. An error means that the background task is gone.
            let _ = self.channel.try_send(message);
        }
    }
}
