//! OTP application: slot configuration, modhex, credential upload

use crate::{
    device::Serial,
    error::{Error, Result},
};
use rand_core::{OsRng, RngCore};
use std::fmt::{self, Display};
use zeroize::Zeroize;

/// Modhex alphabet: the USB-HID scancode-stable encoding used for OTP
/// public identities.
const MODHEX_ALPHABET: &[u8; 16] = b"cbdefghijklnrtuv";

/// Size of a Yubico OTP AES key.
pub const OTP_KEY_SIZE: usize = 16;

/// Size of a Yubico OTP private identity.
pub const PRIVATE_ID_SIZE: usize = 6;

/// Size of an HMAC-SHA1 challenge-response key.
pub const HMAC_KEY_SIZE: usize = 20;

/// Maximum size of an OTP public identity.
const PUBLIC_ID_MAX: usize = 16;

/// One of the two OTP configuration slots.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Slot {
    /// Short-press slot.
    One,

    /// Long-press slot.
    Two,
}

impl TryFrom<u8> for Slot {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Slot::One),
            2 => Ok(Slot::Two),
            _ => Err(Error::InvalidInput { field: "slot" }),
        }
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::One => f.write_str("1"),
            Slot::Two => f.write_str("2"),
        }
    }
}

/// Validated slot configuration ready to be written to the device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SlotConfig {
    /// Yubico OTP credential.
    YubiOtp {
        /// Public identity (decoded from modhex, up to 16 bytes).
        public_id: Vec<u8>,

        /// Private identity.
        private_id: [u8; PRIVATE_ID_SIZE],

        /// AES key.
        key: [u8; OTP_KEY_SIZE],
    },

    /// HMAC-SHA1 challenge-response credential.
    ChallengeResponse {
        /// HMAC key.
        key: [u8; HMAC_KEY_SIZE],

        /// Require a touch per response.
        require_touch: bool,
    },
}

impl SlotConfig {
    /// Build a Yubico OTP configuration from the string forms used at the
    /// boundary. All decoding failures are reported before any device or
    /// registry interaction.
    pub fn yubi_otp(public_id: &str, private_id: &str, key: &str) -> Result<Self> {
        let public_id = modhex_decode(public_id).map_err(|_| Error::InvalidInput {
            field: "public_id",
        })?;

        if public_id.is_empty() || public_id.len() > PUBLIC_ID_MAX {
            return Err(Error::InvalidInput {
                field: "public_id",
            });
        }

        let private_id: [u8; PRIVATE_ID_SIZE] = hex::mixed::decode_vec(private_id)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::InvalidInput {
                field: "private_id",
            })?;

        let key: [u8; OTP_KEY_SIZE] = hex::mixed::decode_vec(key)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::InvalidInput { field: "key" })?;

        Ok(SlotConfig::YubiOtp {
            public_id,
            private_id,
            key,
        })
    }

    /// Build an HMAC-SHA1 challenge-response configuration.
    pub fn challenge_response(key: &str, require_touch: bool) -> Result<Self> {
        let key: [u8; HMAC_KEY_SIZE] = hex::mixed::decode_vec(key)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::InvalidInput { field: "key" })?;

        Ok(SlotConfig::ChallengeResponse {
            key,
            require_touch,
        })
    }
}

impl Drop for SlotConfig {
    fn drop(&mut self) {
        match self {
            SlotConfig::YubiOtp {
                private_id, key, ..
            } => {
                private_id.zeroize();
                key.zeroize();
            }
            SlotConfig::ChallengeResponse { key, .. } => key.zeroize(),
        }
    }
}

/// Device-side refusals of OTP slot commands.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OtpRefusal {
    /// The slot write was rejected.
    WriteFailed,

    /// Any other refusal, with the device-reported reason.
    Failed(String),
}

impl From<OtpRefusal> for Error {
    fn from(refusal: OtpRefusal) -> Error {
        match refusal {
            OtpRefusal::WriteFailed => Error::DeviceRefused {
                reason: "slot write failed".into(),
            },
            OtpRefusal::Failed(reason) => Error::DeviceRefused { reason },
        }
    }
}

/// OTP application session operations, implemented by the transport backend.
pub trait OtpOps {
    /// Device serial number via the OTP application.
    fn serial(&mut self) -> Result<u32>;

    /// Which of the two slots are configured.
    fn slot_status(&mut self) -> Result<[bool; 2]>;

    /// Write a slot configuration.
    fn put_slot(&mut self, slot: Slot, config: &SlotConfig)
        -> core::result::Result<(), OtpRefusal>;

    /// Erase a slot configuration.
    fn delete_slot(&mut self, slot: Slot) -> core::result::Result<(), OtpRefusal>;

    /// Swap the two slot configurations.
    fn swap_slots(&mut self) -> core::result::Result<(), OtpRefusal>;
}

/// Upload error reported by the external credential registry, carrying its
/// per-field validation errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadError {
    /// Field-level errors, by registry field name.
    pub errors: Vec<String>,
}

impl From<UploadError> for Error {
    fn from(err: UploadError) -> Error {
        Error::UploadRejected { errors: err.errors }
    }
}

/// External registry accepting freshly programmed OTP credentials.
pub trait CredentialRegistry {
    /// Upload a credential, returning the registry URL for it.
    fn upload(
        &self,
        key: &[u8; OTP_KEY_SIZE],
        public_id: &[u8],
        private_id: &[u8; PRIVATE_ID_SIZE],
        serial: Option<Serial>,
        client_tag: &str,
    ) -> core::result::Result<String, UploadError>;
}

/// Decode a modhex string. Fails on odd length or characters outside the
/// modhex alphabet.
pub fn modhex_decode(input: &str) -> Result<Vec<u8>> {
    if input.len() % 2 != 0 {
        return Err(Error::InvalidInput { field: "modhex" });
    }

    let nibble = |c: u8| -> Result<u8> {
        MODHEX_ALPHABET
            .iter()
            .position(|&m| m == c.to_ascii_lowercase())
            .map(|i| i as u8)
            .ok_or(Error::InvalidInput { field: "modhex" })
    };

    input
        .as_bytes()
        .chunks(2)
        .map(|pair| Ok(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}

/// Encode bytes as modhex.
pub fn modhex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push(MODHEX_ALPHABET[(byte >> 4) as usize] as char);
        out.push(MODHEX_ALPHABET[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Random private identity in hex form, for pre-filling programming forms.
pub fn random_private_id() -> String {
    let mut id = [0u8; PRIVATE_ID_SIZE];
    OsRng.fill_bytes(&mut id);
    hex::lower::encode_string(&id)
}

/// Random key of `len` bytes in hex form.
pub fn random_key(len: usize) -> String {
    let mut key = vec![0u8; len];
    OsRng.fill_bytes(&mut key);
    let out = hex::lower::encode_string(&key);
    key.zeroize();
    out
}
