//! Operation sequencer
//!
//! [`Manager`] is the session context object owning the transport connector,
//! the external capabilities (certificate parsing, credential registry,
//! notification sink) and the device identity cache. Each public method is
//! one inbound command: a fixed, ordered sequence of device steps.
//!
//! If a step fails, the remaining steps are skipped and the error returned —
//! but device-side effects of the steps that already completed are NOT
//! rolled back. The hardware offers no transactions; callers must treat a
//! failed operation as possibly-partially-applied (for example, a programmed
//! key generation whose certificate store failed leaves the new key in the
//! slot, and a registry upload is not undone when the subsequent slot write
//! fails).

use crate::{
    auth::Authorizer,
    certs::{file_path_from_url, select_leaf, CertParser},
    connection::{self, Connection, Connector, Interfaces},
    device::{Applications, DeviceCache, DeviceInfo},
    error::{Error, Result},
    mgm::MgmKey,
    mgmt::{parse_lock_code, DeviceConfig},
    otp::{modhex_encode, CredentialRegistry, Slot, SlotConfig},
    piv::{AlgorithmId, CertSummary, Date, PivOps, PivRefusal, SlotId},
    prompt::{with_touch_prompt, EventSink, DEFAULT_TOUCH_TIMEOUT},
};
use log::{debug, info};
use serde::Serialize;
use std::{sync::Arc, time::Duration};

/// Result of programming an OTP slot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OtpProgramOutcome {
    /// Registry URL for the uploaded credential, when an upload was
    /// requested.
    pub upload_url: Option<String>,
}

/// Result of importing a certificate/key file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ImportOutcome {
    /// A certificate was parsed and stored.
    pub imported_cert: bool,

    /// A private key was parsed and imported.
    pub imported_key: bool,
}

/// Live PIV application status.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PivOverview {
    /// Certificates currently stored, by slot.
    pub certs: Vec<CertSummary>,

    /// Management key is derived from the PIN.
    pub has_derived_key: bool,

    /// Management key is stored in a PIN-protected object.
    pub has_protected_key: bool,

    /// Management key material is stored on the device.
    pub has_stored_key: bool,

    /// Remaining PIN attempts.
    pub pin_tries: u8,

    /// The PUK retry counter is exhausted.
    pub puk_blocked: bool,
}

/// Session context owning the identity cache, the transport connector and
/// the external capabilities. One instance is created at startup and dropped
/// at shutdown; every operation goes through it.
///
/// Each operation acquires a connection for its exclusive duration and
/// releases it before returning; there is no pooling and no overlap.
pub struct Manager {
    connector: Box<dyn Connector>,
    parser: Box<dyn CertParser>,
    registry: Box<dyn CredentialRegistry>,
    sink: Arc<dyn EventSink>,
    cache: DeviceCache,
    touch_timeout: Duration,
}

impl Manager {
    /// Create a session context over the given transport and capabilities.
    pub fn new(
        connector: Box<dyn Connector>,
        parser: Box<dyn CertParser>,
        registry: Box<dyn CredentialRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            connector,
            parser,
            registry,
            sink,
            cache: DeviceCache::new(),
            touch_timeout: DEFAULT_TOUCH_TIMEOUT,
        }
    }

    /// Override the touch-prompt grace period.
    pub fn with_touch_timeout(mut self, timeout: Duration) -> Self {
        self.touch_timeout = timeout;
        self
    }

    /// The cached device snapshot, if a refresh has succeeded since the
    /// last invalidation.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.cache.current()
    }

    fn open(&self, interfaces: Interfaces) -> Result<Box<dyn Connection + '_>> {
        connection::open(self.connector.as_ref(), interfaces)
    }

    //
    // Device identity and configuration
    //

    /// Poll device presence and return the capability snapshot, served from
    /// the cache while the device fingerprint is unchanged.
    pub fn refresh(&mut self) -> Result<DeviceInfo> {
        self.cache.refresh(self.connector.as_ref())
    }

    /// Write the per-transport application configuration, optionally
    /// authorized by a 16-byte hex lock code. Persists across USB interface
    /// resets. Invalidates the identity cache on success.
    pub fn write_config(
        &mut self,
        usb_enabled: Applications,
        nfc_enabled: Applications,
        lock_code: Option<&str>,
    ) -> Result<()> {
        let lock_code = lock_code.map(parse_lock_code).transpose()?;

        {
            let mut conn = self.open(Interfaces::all())?;
            let mut mgmt = conn.management()?;
            mgmt.write_config(
                &DeviceConfig {
                    usb_enabled,
                    nfc_enabled,
                },
                true,
                lock_code.as_ref(),
            )?;
        }

        info!("device configuration written");
        self.cache.invalidate();
        Ok(())
    }

    //
    // OTP application
    //

    /// Which of the two OTP slots are configured.
    pub fn slots_status(&mut self) -> Result<[bool; 2]> {
        let mut conn = self.open(Interfaces::OTP)?;
        let status = conn.otp()?.slot_status();
        status
    }

    /// The device serial in the modhex form used by OTP tooling.
    pub fn serial_modhex(&mut self) -> Result<String> {
        let mut conn = self.open(Interfaces::OTP)?;
        let serial = conn.otp()?.serial()?;

        let mut data = vec![0xff, 0x00];
        data.extend_from_slice(&serial.to_be_bytes());
        Ok(modhex_encode(&data))
    }

    /// Program a Yubico OTP credential into a slot, optionally uploading it
    /// to the external credential registry first.
    ///
    /// Input decoding failures abort before any registry or device
    /// interaction; an upload failure aborts before the device write. A
    /// device write failure after a successful upload is reported but the
    /// upload is not undone.
    pub fn program_otp(
        &mut self,
        slot: Slot,
        public_id: &str,
        private_id: &str,
        key: &str,
        upload: bool,
        client_tag: &str,
    ) -> Result<OtpProgramOutcome> {
        let config = SlotConfig::yubi_otp(public_id, private_id, key)?;
        let serial = self.cache.current().and_then(|info| info.serial);

        let mut conn = self.open(Interfaces::OTP)?;
        let mut otp = conn.otp()?;

        let mut upload_url = None;
        if upload {
            if let SlotConfig::YubiOtp {
                public_id,
                private_id,
                key,
            } = &config
            {
                match self
                    .registry
                    .upload(key, public_id, private_id, serial, client_tag)
                {
                    Ok(url) => {
                        debug!("credential uploaded: {}", url);
                        upload_url = Some(url);
                    }
                    Err(e) => {
                        debug!("credential upload rejected: {:?}", e.errors);
                        return Err(e.into());
                    }
                }
            }
        }

        otp.put_slot(slot, &config)?;
        info!("OTP slot {} programmed", slot);

        Ok(OtpProgramOutcome { upload_url })
    }

    /// Program an HMAC-SHA1 challenge-response credential into a slot.
    pub fn program_challenge_response(
        &mut self,
        slot: Slot,
        key: &str,
        require_touch: bool,
    ) -> Result<()> {
        let config = SlotConfig::challenge_response(key, require_touch)?;

        let mut conn = self.open(Interfaces::OTP)?;
        conn.otp()?.put_slot(slot, &config)?;
        Ok(())
    }

    /// Erase an OTP slot.
    pub fn erase_slot(&mut self, slot: Slot) -> Result<()> {
        let mut conn = self.open(Interfaces::OTP)?;
        conn.otp()?.delete_slot(slot)?;
        Ok(())
    }

    /// Swap the two OTP slot configurations.
    pub fn swap_slots(&mut self) -> Result<()> {
        let mut conn = self.open(Interfaces::OTP)?;
        conn.otp()?.swap_slots()?;
        Ok(())
    }

    //
    // PIV application
    //

    /// Live PIV status: stored certificates, management key administration
    /// metadata and the current PIN retry counter.
    pub fn piv_refresh(&mut self) -> Result<PivOverview> {
        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        let pivman = piv.pivman()?;
        let certs = piv.certificates()?;
        let pin_tries = piv.pin_attempts()?;

        Ok(PivOverview {
            certs,
            has_derived_key: pivman.has_derived_key,
            has_protected_key: pivman.has_protected_key,
            has_stored_key: pivman.has_stored_key,
            pin_tries,
            puk_blocked: pivman.puk_blocked,
        })
    }

    /// Generate a key in a slot and store a self-signed certificate for it.
    ///
    /// The expiration date is validated before any device mutation. The PIN
    /// is re-verified immediately before and after key generation: the
    /// slot's PIN/touch policy may demand proof freshly bound to each call,
    /// so a proof from before the generation boundary is not trusted across
    /// it. A security-condition refusal while storing maps to
    /// [`Error::PinRequired`] even though the PIN was nominally verified.
    pub fn piv_generate_certificate(
        &mut self,
        slot: SlotId,
        algorithm: AlgorithmId,
        common_name: &str,
        expiration_date: &str,
        pin: Option<&str>,
        mgm_key_hex: Option<&str>,
    ) -> Result<()> {
        let not_after = Date::parse_iso8601(expiration_date)?;
        let not_before = Date::today();

        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        with_touch_prompt(&self.sink, self.touch_timeout, || -> Result<()> {
            let mut auth = Authorizer::new(piv.as_mut());
            auth.ensure_authenticated(pin, mgm_key_hex)?;

            auth.verify_pin(pin)?;
            let public_key = auth.generate_key(slot, algorithm)?;
            auth.verify_pin(pin)?;

            let cert = auth.self_signed_certificate(
                slot,
                &public_key,
                common_name,
                not_before,
                not_after,
            )?;
            auth.put_certificate(slot, &cert)?;
            auth.update_chuid()?;

            info!("self-signed certificate stored in slot {}", slot);
            Ok(())
        })
    }

    /// Check whether file data parses as a certificate or a private key.
    pub fn piv_can_parse(&self, data: &[u8]) -> Result<()> {
        let cert_ok = matches!(
            self.parser.parse_certificates(data, None).as_deref(),
            Ok([_, ..])
        );
        let key_ok = self.parser.parse_private_key(data, None).is_ok();

        if cert_ok || key_ok {
            Ok(())
        } else {
            Err(Error::ParseFailed)
        }
    }

    /// Import certificates and/or a private key from file data into a slot.
    ///
    /// Certificate and key parsing are attempted independently and both may
    /// succeed; if neither does, the operation fails before any device
    /// interaction. When the data carries multiple certificates, the leaf
    /// (the one no other certificate names as issuer) is selected.
    pub fn piv_import_file(
        &mut self,
        slot: SlotId,
        data: &[u8],
        password: Option<&str>,
        pin: Option<&str>,
        mgm_key_hex: Option<&str>,
    ) -> Result<ImportOutcome> {
        let certs = self
            .parser
            .parse_certificates(data, password)
            .ok()
            .filter(|certs| !certs.is_empty());
        let key = self.parser.parse_private_key(data, password).ok();

        if certs.is_none() && key.is_none() {
            return Err(Error::ParseFailed);
        }

        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        with_touch_prompt(&self.sink, self.touch_timeout, || -> Result<ImportOutcome> {
            let mut auth = Authorizer::new(piv.as_mut());
            auth.ensure_authenticated(pin, mgm_key_hex)?;

            if let Some(key) = &key {
                auth.put_key(slot, &key.der)?;
            }

            if let Some(certs) = &certs {
                let leaf = select_leaf(certs).ok_or(Error::ParseFailed)?;
                auth.put_certificate(slot, &leaf.der)?;
                auth.update_chuid()?;
            }

            Ok(ImportOutcome {
                imported_cert: certs.is_some(),
                imported_key: key.is_some(),
            })
        })
    }

    /// Read a file URL and import its contents into a slot.
    pub fn piv_import_file_url(
        &mut self,
        slot: SlotId,
        file_url: &str,
        password: Option<&str>,
        pin: Option<&str>,
        mgm_key_hex: Option<&str>,
    ) -> Result<ImportOutcome> {
        let path = file_path_from_url(file_url)?;
        let data = std::fs::read(&path).map_err(|e| Error::Unknown {
            message: format!("failed reading {}: {}", path.display(), e),
        })?;

        self.piv_import_file(slot, &data, password, pin, mgm_key_hex)
    }

    /// Read the certificate stored in a slot (DER).
    pub fn piv_export_certificate(&mut self, slot: SlotId) -> Result<Vec<u8>> {
        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;
        piv.certificate(slot)?.ok_or(Error::NotFound)
    }

    /// Delete the certificate stored in a slot.
    pub fn piv_delete_certificate(
        &mut self,
        slot: SlotId,
        pin: Option<&str>,
        mgm_key_hex: Option<&str>,
    ) -> Result<()> {
        debug!("deleting certificate in slot {}", slot);

        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        with_touch_prompt(&self.sink, self.touch_timeout, || -> Result<()> {
            let mut auth = Authorizer::new(piv.as_mut());
            auth.ensure_authenticated(pin, mgm_key_hex)?;
            auth.delete_certificate(slot)?;
            auth.update_chuid()?;
            Ok(())
        })
    }

    /// Change the PIN. A wrong old PIN is reported with the device's fresh
    /// post-failure retry counter.
    pub fn piv_change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<()> {
        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        let result = piv.change_pin(old_pin.as_bytes(), new_pin.as_bytes());
        match result {
            Ok(()) => {
                debug!("PIN change successful");
                Ok(())
            }
            Err(refusal) => Err(credential_refusal(piv.as_mut(), refusal, false)),
        }
    }

    /// Change the PUK.
    pub fn piv_change_puk(&mut self, old_puk: &str, new_puk: &str) -> Result<()> {
        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        let result = piv.change_puk(old_puk.as_bytes(), new_puk.as_bytes());
        match result {
            Ok(()) => Ok(()),
            Err(refusal) => Err(credential_refusal(piv.as_mut(), refusal, true)),
        }
    }

    /// Reset a blocked PIN using the PUK.
    pub fn piv_unblock_pin(&mut self, puk: &str, new_pin: &str) -> Result<()> {
        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        let result = piv.unblock_pin(puk.as_bytes(), new_pin.as_bytes());
        match result {
            Ok(()) => Ok(()),
            Err(refusal) => Err(credential_refusal(piv.as_mut(), refusal, true)),
        }
    }

    /// Install a new management key.
    ///
    /// Replacing a protected-key configuration (or storing the new key
    /// protected) substitutes PIN proof for the current-key proof; the new
    /// key is validated before any authorization attempt.
    pub fn piv_change_mgm_key(
        &mut self,
        pin: Option<&str>,
        current_key_hex: Option<&str>,
        new_key_hex: &str,
        store_on_device: bool,
    ) -> Result<()> {
        let new_key =
            MgmKey::from_hex(new_key_hex).map_err(|_| Error::NewManagementKeyBadFormat)?;

        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        let protected = piv.pivman()?.has_protected_key;

        let mut auth = Authorizer::new(piv.as_mut());
        if protected || store_on_device {
            auth.verify_pin(pin)?;
        }
        auth.ensure_authenticated(pin, current_key_hex)?;
        auth.set_mgm_key(&new_key, false, store_on_device)?;

        info!("management key changed (protected: {})", store_on_device);
        Ok(())
    }

    /// Random management key in hex form, for pre-filling change forms.
    pub fn piv_generate_random_mgm_key(&self) -> String {
        MgmKey::generate().to_hex()
    }

    /// Reset the PIV application to factory state.
    pub fn piv_reset(&mut self) -> Result<()> {
        let mut conn = self.open(Interfaces::all())?;
        let mut piv = conn.piv()?;

        let result = piv.reset();
        result.map_err(|refusal| credential_refusal(piv.as_mut(), refusal, false))
    }

    //
    // FIDO application
    //

    /// Whether a FIDO client PIN is set.
    pub fn fido_has_pin(&mut self) -> Result<bool> {
        let mut conn = self.open(Interfaces::FIDO)?;
        let has_pin = conn.fido()?.has_pin();
        has_pin
    }

    /// Remaining FIDO PIN attempts, distinguishing a transiently blocked
    /// authenticator from a terminally blocked PIN.
    pub fn fido_pin_retries(&mut self) -> Result<u8> {
        let mut conn = self.open(Interfaces::FIDO)?;
        let result = conn.fido()?.pin_retries();
        result.map_err(Error::from)
    }

    /// Set the initial FIDO client PIN.
    pub fn fido_set_pin(&mut self, new_pin: &str) -> Result<()> {
        let mut conn = self.open(Interfaces::FIDO)?;
        let result = conn.fido()?.set_pin(new_pin);
        result.map_err(Error::from)
    }

    /// Change the FIDO client PIN.
    pub fn fido_change_pin(&mut self, current_pin: &str, new_pin: &str) -> Result<()> {
        let mut conn = self.open(Interfaces::FIDO)?;
        let result = conn.fido()?.change_pin(current_pin, new_pin);
        result.map_err(Error::from)
    }

    /// Factory-reset the FIDO application.
    pub fn fido_reset(&mut self) -> Result<()> {
        let mut conn = self.open(Interfaces::FIDO)?;
        let result = conn.fido()?.reset();
        result.map_err(Error::from)
    }
}

/// Translate a refusal of a PIN/PUK credential command, re-querying the
/// relevant retry counter for a fresh value.
fn credential_refusal(piv: &mut dyn PivOps, refusal: PivRefusal, puk: bool) -> Error {
    match refusal {
        PivRefusal::InvalidPin => {
            let tries = if puk {
                piv.puk_attempts()
            } else {
                piv.pin_attempts()
            };

            match tries {
                Ok(tries) if puk => Error::WrongPuk { tries },
                Ok(tries) => {
                    debug!("credential change failed, {} tries left", tries);
                    Error::WrongPin { tries }
                }
                Err(e) => e,
            }
        }
        PivRefusal::AuthBlocked => Error::PinLocked,
        PivRefusal::AuthenticationFailed => Error::WrongManagementKey,
        PivRefusal::SecurityCondition => Error::PinRequired,
        PivRefusal::IncorrectParameters => Error::IncorrectParameters,
        PivRefusal::Failed(reason) => Error::DeviceRefused { reason },
    }
}
