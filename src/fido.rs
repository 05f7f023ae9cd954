//! FIDO application: client PIN lifecycle

use crate::error::{Error, Result};

/// Refusals reported by the authenticator's client-PIN protocol.
///
/// `PinAuthBlocked` and `PinBlocked` are deliberately distinct: the former
/// clears when the device is removed and re-inserted, the latter only on a
/// full authenticator reset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FidoRefusal {
    /// The PIN violates the authenticator's length limits.
    InvalidLength,

    /// The PIN violates the authenticator's PIN policy.
    PinPolicyViolation,

    /// The current PIN is wrong.
    PinInvalid,

    /// PIN authentication is blocked until the device is power-cycled.
    PinAuthBlocked,

    /// The PIN is blocked until the authenticator is reset.
    PinBlocked,

    /// The operation is not allowed in the current state.
    NotAllowed,

    /// The authenticator timed out waiting for a touch.
    ActionTimeout,

    /// Any other refusal, with the device-reported reason.
    Failed(String),
}

impl From<FidoRefusal> for Error {
    fn from(refusal: FidoRefusal) -> Error {
        match refusal {
            FidoRefusal::InvalidLength | FidoRefusal::PinPolicyViolation => Error::FidoPinTooLong,
            FidoRefusal::PinInvalid => Error::FidoWrongPin,
            FidoRefusal::PinAuthBlocked => Error::FidoPinAuthBlocked,
            FidoRefusal::PinBlocked => Error::FidoPinBlocked,
            FidoRefusal::NotAllowed => Error::FidoNotAllowed,
            FidoRefusal::ActionTimeout => Error::FidoTouchTimeout,
            FidoRefusal::Failed(reason) => Error::DeviceRefused { reason },
        }
    }
}

/// FIDO application session operations, implemented by the transport
/// backend.
pub trait FidoOps {
    /// Whether a client PIN is set.
    fn has_pin(&mut self) -> Result<bool>;

    /// Remaining PIN attempts.
    fn pin_retries(&mut self) -> core::result::Result<u8, FidoRefusal>;

    /// Set the initial client PIN.
    fn set_pin(&mut self, new_pin: &str) -> core::result::Result<(), FidoRefusal>;

    /// Change the client PIN.
    fn change_pin(&mut self, current: &str, new: &str) -> core::result::Result<(), FidoRefusal>;

    /// Factory-reset the authenticator, wiping credentials and PIN.
    fn reset(&mut self) -> core::result::Result<(), FidoRefusal>;
}
