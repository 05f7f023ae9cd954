//! PIV management keys

// Weak-key screening adapted from yubico-piv-tool:
// <https://github.com/Yubico/yubico-piv-tool/>
//
// Copyright (c) 2014-2016 Yubico AB
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//   * Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//
//   * Redistributions in binary form must reproduce the above
//     copyright notice, this list of conditions and the following
//     disclaimer in the documentation and/or other materials provided
//     with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use crate::error::{Error, Result};
use log::error;
use rand_core::{OsRng, RngCore};
use zeroize::Zeroize;

/// Size of a DES key
const DES_LEN_DES: usize = 8;

/// Size of a management key (Triple-DES)
pub const KEY_SIZE: usize = DES_LEN_DES * 3;

/// Hex length of a management key at the string boundary.
pub const KEY_HEX_SIZE: usize = KEY_SIZE * 2;

/// Weak and semi-weak DES keys as taken from:
/// %A D.W. Davies
/// %A W.L. Price
/// %T Security for Computer Networks
/// %I John Wiley & Sons
/// %D 1984
const WEAK_DES_KEYS: &[[u8; DES_LEN_DES]] = &[
    // weak keys
    [0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01],
    [0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE],
    [0x1F, 0x1F, 0x1F, 0x1F, 0x0E, 0x0E, 0x0E, 0x0E],
    [0xE0, 0xE0, 0xE0, 0xE0, 0xF1, 0xF1, 0xF1, 0xF1],
    // semi-weak keys
    [0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE],
    [0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01],
    [0x1F, 0xE0, 0x1F, 0xE0, 0x0E, 0xF1, 0x0E, 0xF1],
    [0xE0, 0x1F, 0xE0, 0x1F, 0xF1, 0x0E, 0xF1, 0x0E],
    [0x01, 0xE0, 0x01, 0xE0, 0x01, 0xF1, 0x01, 0xF1],
    [0xE0, 0x01, 0xE0, 0x01, 0xF1, 0x01, 0xF1, 0x01],
    [0x1F, 0xFE, 0x1F, 0xFE, 0x0E, 0xFE, 0x0E, 0xFE],
    [0xFE, 0x1F, 0xFE, 0x1F, 0xFE, 0x0E, 0xFE, 0x0E],
    [0x01, 0x1F, 0x01, 0x1F, 0x01, 0x0E, 0x01, 0x0E],
    [0x1F, 0x01, 0x1F, 0x01, 0x0E, 0x01, 0x0E, 0x01],
    [0xE0, 0xFE, 0xE0, 0xFE, 0xF1, 0xFE, 0xF1, 0xFE],
    [0xFE, 0xE0, 0xFE, 0xE0, 0xFE, 0xF1, 0xFE, 0xF1],
];

/// Management key administration types (manual/derived/protected).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MgmType {
    /// Stored by the user and supplied explicitly.
    Manual,

    /// Derived from the PIN via a device-side salt.
    Derived,

    /// Stored in a PIN-protected data object on the device.
    Protected,
}

/// Management key authorizing PIV administrative operations.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct MgmKey([u8; KEY_SIZE]);

impl MgmKey {
    /// Generate a random management key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        loop {
            OsRng.fill_bytes(&mut key);
            if !is_weak_key(&key) {
                return Self(key);
            }
        }
    }

    /// Create a management key from a byte slice.
    ///
    /// Fails with [`Error::ManagementKeyBadFormat`] if the slice is the
    /// wrong size or a known-weak Triple-DES key.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| Error::ManagementKeyBadFormat)?;

        if is_weak_key(&key) {
            error!("rejecting weak management key (with odd parity)");
            return Err(Error::ManagementKeyBadFormat);
        }

        Ok(Self(key))
    }

    /// Create a management key from its 48-character hex form.
    ///
    /// The length check happens before hex decoding so that no partially
    /// decoded material is examined.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        if hex_key.len() != KEY_HEX_SIZE {
            return Err(Error::ManagementKeyBadFormat);
        }

        let bytes =
            hex::mixed::decode_vec(hex_key).map_err(|_| Error::ManagementKeyBadFormat)?;

        Self::from_bytes(bytes)
    }

    /// Hex form of this key, for handing a generated key back to the caller.
    pub fn to_hex(&self) -> String {
        hex::lower::encode_string(&self.0)
    }
}

impl AsRef<[u8]> for MgmKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for MgmKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Is any 8-byte block of this key a weak DES key (after parity
/// normalization)?
fn is_weak_key(key: &[u8; KEY_SIZE]) -> bool {
    // set odd parity of key
    let mut tmp = [0u8; KEY_SIZE];

    for i in 0..KEY_SIZE {
        // count number of set bits in byte, excluding the low-order bit - SWAR method
        let mut c = key[i] & 0xFE;

        c = (c & 0x55) + ((c >> 1) & 0x55);
        c = (c & 0x33) + ((c >> 2) & 0x33);
        c = (c & 0x0F) + ((c >> 4) & 0x0F);

        // if count is even, set low key bit to 1, otherwise 0
        tmp[i] = (key[i] & 0xFE) | u8::from(c & 0x01 != 0x01);
    }

    let weak = WEAK_DES_KEYS.iter().any(|weak_key| {
        weak_key == &tmp[0..DES_LEN_DES]
            || weak_key == &tmp[DES_LEN_DES..2 * DES_LEN_DES]
            || weak_key == &tmp[2 * DES_LEN_DES..3 * DES_LEN_DES]
    });

    tmp.zeroize();
    weak
}
