//! PIV authorization engine
//!
//! Decides which proof of authorization a PIV session requires (PIN in
//! protected-key mode, explicit management key otherwise), executes the
//! proof, and classifies refusals. Protected PIV operations are exposed as
//! methods on [`Authorizer`] so that the state machine can check that the
//! required proof was established in this session before the command is
//! issued.
//!
//! Verification failures during `ensure_authenticated` are propagated, not
//! swallowed: a wrong PIN has already cost a device-side retry and the
//! caller must learn the fresh counter immediately.

use crate::{
    chuid,
    error::{Error, Result},
    mgm::MgmKey,
    piv::{AlgorithmId, Date, PivOps, PivRefusal, SlotId},
    policy::{PinPolicy, TouchPolicy},
};
use log::{debug, info};

/// Authorization proof established on a PIV session.
///
/// Transitions only move forward within one session lifetime and are never
/// persisted across sessions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthState {
    /// No proof established.
    Unauthenticated,

    /// The PIN has been verified.
    PinVerified,

    /// The management key has been accepted.
    ManagementAuthenticated,

    /// Both proofs established.
    Both,
}

impl AuthState {
    /// Whether PIN proof is established.
    pub fn pin_verified(self) -> bool {
        matches!(self, AuthState::PinVerified | AuthState::Both)
    }

    /// Whether management authorization is established.
    pub fn management_authenticated(self) -> bool {
        matches!(self, AuthState::ManagementAuthenticated | AuthState::Both)
    }

    fn grant_pin(&mut self) {
        *self = match self {
            AuthState::Unauthenticated | AuthState::PinVerified => AuthState::PinVerified,
            _ => AuthState::Both,
        };
    }

    fn grant_management(&mut self) {
        *self = match self {
            AuthState::Unauthenticated | AuthState::ManagementAuthenticated => {
                AuthState::ManagementAuthenticated
            }
            _ => AuthState::Both,
        };
    }
}

/// A PIV session wrapper enforcing the authorization state machine.
///
/// Borrows the session for the duration of one top-level operation; the
/// state dies with it.
pub struct Authorizer<'a> {
    ops: &'a mut dyn PivOps,
    state: AuthState,
}

impl<'a> Authorizer<'a> {
    /// Wrap a PIV session with no proof established.
    pub fn new(ops: &'a mut dyn PivOps) -> Self {
        Self {
            ops,
            state: AuthState::Unauthenticated,
        }
    }

    /// Current authorization state.
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Establish management authorization with whichever proof the device's
    /// stored-credential metadata demands.
    ///
    /// Protected-key mode derives management authorization from a correct
    /// PIN; a missing PIN fails [`Error::PinRequired`]. Explicit-key mode
    /// requires `mgm_key_hex` (48 hex characters); a missing key fails
    /// [`Error::ManagementKeyRequired`] and a malformed one fails
    /// [`Error::ManagementKeyBadFormat`] before any device call.
    pub fn ensure_authenticated(
        &mut self,
        pin: Option<&str>,
        mgm_key_hex: Option<&str>,
    ) -> Result<()> {
        let pivman = self.ops.pivman()?;

        if pivman.has_protected_key {
            let pin = pin.ok_or(Error::PinRequired)?;
            self.verify_pin_value(pin)?;
            // a correct PIN unlocks the protected key on the device
            self.state.grant_management();
            debug!("management authorization via protected key");
            Ok(())
        } else {
            let mgm_key_hex = mgm_key_hex.ok_or(Error::ManagementKeyRequired)?;
            let key = MgmKey::from_hex(mgm_key_hex)?;

            let result = self.ops.authenticate(&key);
            match result {
                Ok(()) => {
                    self.state.grant_management();
                    debug!("management authorization via explicit key");
                    Ok(())
                }
                Err(refusal) => Err(self.classify(refusal)),
            }
        }
    }

    /// Verify the PIN, required before any key-generation step. A missing
    /// PIN fails [`Error::PinRequired`]; a rejected PIN is reported with the
    /// device's post-failure retry counter.
    pub fn verify_pin(&mut self, pin: Option<&str>) -> Result<()> {
        let pin = pin.ok_or(Error::PinRequired)?;
        self.verify_pin_value(pin)
    }

    fn verify_pin_value(&mut self, pin: &str) -> Result<()> {
        let result = self.ops.verify_pin(pin.as_bytes());
        match result {
            Ok(()) => {
                self.state.grant_pin();
                Ok(())
            }
            Err(refusal) => Err(self.classify(refusal)),
        }
    }

    /// Generate a key in a slot. Requires PIN proof from this session.
    pub fn generate_key(&mut self, slot: SlotId, algorithm: AlgorithmId) -> Result<Vec<u8>> {
        if !self.state.pin_verified() {
            return Err(Error::PinRequired);
        }

        info!("generating {:?} key in slot {}", algorithm, slot);
        let result =
            self.ops
                .generate_key(slot, algorithm, PinPolicy::Default, TouchPolicy::Default);
        result.map_err(|refusal| self.classify(refusal))
    }

    /// Build a self-signed certificate on the device for a freshly
    /// generated key. Requires management authorization.
    pub fn self_signed_certificate(
        &mut self,
        slot: SlotId,
        public_key: &[u8],
        common_name: &str,
        not_before: Date,
        not_after: Date,
    ) -> Result<Vec<u8>> {
        if !self.state.management_authenticated() {
            return Err(Error::PinRequired);
        }

        let result =
            self.ops
                .self_signed_certificate(slot, public_key, common_name, not_before, not_after);
        result.map_err(|refusal| self.classify(refusal))
    }

    /// Store a certificate in a slot. Requires management authorization.
    pub fn put_certificate(&mut self, slot: SlotId, der: &[u8]) -> Result<()> {
        if !self.state.management_authenticated() {
            return Err(Error::PinRequired);
        }

        let result = self.ops.put_certificate(slot, der);
        result.map_err(|refusal| self.classify(refusal))
    }

    /// Import a private key into a slot. Requires management authorization.
    pub fn put_key(&mut self, slot: SlotId, der: &[u8]) -> Result<()> {
        if !self.state.management_authenticated() {
            return Err(Error::PinRequired);
        }

        let result = self.ops.put_key(slot, der);
        result.map_err(|refusal| self.classify(refusal))
    }

    /// Delete the certificate in a slot. Requires management authorization.
    pub fn delete_certificate(&mut self, slot: SlotId) -> Result<()> {
        if !self.state.management_authenticated() {
            return Err(Error::PinRequired);
        }

        let result = self.ops.delete_certificate(slot);
        result.map_err(|refusal| self.classify(refusal))
    }

    /// Install a new management key. Requires management authorization.
    pub fn set_mgm_key(&mut self, key: &MgmKey, require_touch: bool, protect: bool) -> Result<()> {
        if !self.state.management_authenticated() {
            return Err(Error::PinRequired);
        }

        let result = self.ops.set_mgm_key(key, require_touch, protect);
        result.map_err(|refusal| self.classify(refusal))
    }

    /// Regenerate the card-holder-unique-identifier object, signaling to
    /// other readers that stored certificates changed. Requires management
    /// authorization.
    pub fn update_chuid(&mut self) -> Result<()> {
        if !self.state.management_authenticated() {
            return Err(Error::PinRequired);
        }

        let result = self.ops.put_object(chuid::OBJECT_ID, &chuid::generate());
        result.map_err(|refusal| self.classify(refusal))
    }

    /// Translate a device refusal into the crate taxonomy, re-querying the
    /// PIN retry counter where a fresh value is required.
    fn classify(&mut self, refusal: PivRefusal) -> Error {
        match refusal {
            PivRefusal::InvalidPin => match self.ops.pin_attempts() {
                Ok(tries) => Error::WrongPin { tries },
                Err(e) => e,
            },
            PivRefusal::AuthBlocked => Error::PinLocked,
            PivRefusal::AuthenticationFailed => Error::WrongManagementKey,
            PivRefusal::SecurityCondition => Error::PinRequired,
            PivRefusal::IncorrectParameters => Error::IncorrectParameters,
            PivRefusal::Failed(reason) => Error::DeviceRefused { reason },
        }
    }
}
