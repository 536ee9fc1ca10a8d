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

use alloc::{format, string::String};
use rand_chacha::{
    rand_core::{RngCore as _, SeedableRng as _},
    ChaCha20Rng,
};

/// Implementation of the `BuildHasher` trait for the sip hasher.
///
/// Contrary to the one in the standard library, a seed is explicitly passed here, making the
/// hashing predictable. This is a good thing for tests and no-std compatibility.
#[derive(Clone)]
pub struct SipHasherBuild([u8; 16]);

impl SipHasherBuild {
    pub fn new(seed: [u8; 16]) -> SipHasherBuild {
        SipHasherBuild(seed)
    }
}

impl core::hash::BuildHasher for SipHasherBuild {
    type Hasher = siphasher::sip::SipHasher;

    fn build_hasher(&self) -> Self::Hasher {
        siphasher::sip::SipHasher::new_with_key(&self.0)
    }
}

/// Source of hashing seeds derived from a single user-provided seed.
///
/// Collections whose keys are chosen by the JSON-RPC server (such as subscription IDs) use a
/// [`SipHasherBuild`] with a seed extracted from here, in order to avoid HashDoS attacks.
pub struct SeedSource(ChaCha20Rng);

impl SeedSource {
    pub fn new(randomness_seed: [u8; 32]) -> Self {
        SeedSource(ChaCha20Rng::from_seed(randomness_seed))
    }

    /// Returns a new [`SipHasherBuild`] with a seed that has never been returned before.
    pub fn hasher(&mut self) -> SipHasherBuild {
        let mut seed = [0; 16];
        self.0.fill_bytes(&mut seed);
        SipHasherBuild::new(seed)
    }
}

/// Turns a hexadecimal string, with or without `0x` prefix and in any case, into a lowercase
/// `0x`-prefixed string.
///
/// Returns `None` if the input isn't valid hexadecimal.
pub fn canonical_hex(input: &str) -> Option<String> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if digits.len() % 2 != 0 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    Some(format!("0x{}", digits.to_ascii_lowercase()))
}
