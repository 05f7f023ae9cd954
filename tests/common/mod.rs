//! In-memory device backend shared by the orchestration tests.
//!
//! Models the device-visible behavior the orchestration layer depends on:
//! presence/fingerprint scans, per-application sessions, PIN/PUK retry
//! counters that decrement on failure, protected vs explicit management key
//! modes, slot storage and configuration locking.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use yubikey_manager::{
    certs::{CertParser, ParseRejected, ParsedCertificate, ParsedKey},
    connection::{Connection, Connector, Interfaces, Scan},
    device::{Applications, DeviceInfo, Fingerprint, FormFactor, Serial, Version},
    error::Result,
    fido::{FidoOps, FidoRefusal},
    manager::Manager,
    mgm::MgmKey,
    mgmt::{DeviceConfig, ManagementOps, MgmtRefusal},
    otp::{CredentialRegistry, OtpOps, OtpRefusal, Slot, SlotConfig, UploadError},
    piv::{
        AlgorithmId, CertSummary, Date, ObjectId, PivOps, PivRefusal, PivmanData, SlotId,
    },
    policy::{PinPolicy, TouchPolicy},
    prompt::{Event, EventSink},
};

pub const DEFAULT_PIN: &str = "123456";
pub const DEFAULT_PUK: &str = "12345678";
pub const DEFAULT_MGM_HEX: &str = "010203040506070801020304050607080102030405060708";
pub const SERIAL: u32 = 9_030_212;

/// Complete mutable state of the simulated device.
pub struct MockState {
    pub devices: usize,
    pub fingerprint: u64,
    pub info: DeviceInfo,
    pub connects: usize,

    // management
    pub lock_code: Option<[u8; 16]>,

    // otp
    pub slots: [Option<SlotConfig>; 2],
    pub otp_write_fails: bool,

    // piv
    pub pin: String,
    pub pin_tries: u8,
    pub puk: String,
    pub puk_tries: u8,
    pub protected: bool,
    pub mgm_key: Vec<u8>,
    pub certs: Vec<(SlotId, Vec<u8>)>,
    pub keys: Vec<SlotId>,
    pub objects: Vec<(ObjectId, Vec<u8>)>,
    pub verify_calls: usize,
    pub authenticate_calls: usize,
    pub refuse_cert_store: bool,

    // fido
    pub fido_pin: Option<String>,
    pub fido_retries: u8,
    pub fido_auth_blocked: bool,
    pub fido_blocked: bool,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            devices: 1,
            fingerprint: 1,
            info: DeviceInfo {
                name: "YubiKey 5 NFC".into(),
                version: Version::new(5, 4, 3),
                serial: Some(Serial::from(SERIAL)),
                usb_supported: Applications::all(),
                usb_enabled: Applications::all(),
                nfc_supported: Applications::all(),
                nfc_enabled: Applications::all(),
                usb_interfaces_supported: Interfaces::all(),
                usb_interfaces_enabled: Interfaces::all(),
                form_factor: FormFactor::UsbAKeychain,
                configuration_locked: false,
            },
            connects: 0,
            lock_code: None,
            slots: [None, None],
            otp_write_fails: false,
            pin: DEFAULT_PIN.into(),
            pin_tries: 3,
            puk: DEFAULT_PUK.into(),
            puk_tries: 3,
            protected: false,
            mgm_key: vec![1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8],
            certs: Vec::new(),
            keys: Vec::new(),
            objects: Vec::new(),
            verify_calls: 0,
            authenticate_calls: 0,
            refuse_cert_store: false,
            fido_pin: None,
            fido_retries: 8,
            fido_auth_blocked: false,
            fido_blocked: false,
        }
    }

    pub fn stored_cert(&self, slot: SlotId) -> Option<&[u8]> {
        self.certs
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, der)| der.as_slice())
    }

    pub fn object(&self, id: ObjectId) -> Option<&[u8]> {
        self.objects
            .iter()
            .find(|(oid, _)| *oid == id)
            .map(|(_, data)| data.as_slice())
    }

    fn put_cert(&mut self, slot: SlotId, der: Vec<u8>) {
        self.certs.retain(|(s, _)| *s != slot);
        self.certs.push((slot, der));
    }

    fn put_obj(&mut self, id: ObjectId, data: Vec<u8>) {
        self.objects.retain(|(oid, _)| *oid != id);
        self.objects.push((id, data));
    }
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockConnector(pub Shared);

impl Connector for MockConnector {
    fn scan(&self) -> Result<Scan> {
        let state = self.0.lock().unwrap();
        Ok(Scan {
            devices: state.devices,
            fingerprint: Fingerprint::from(state.fingerprint),
        })
    }

    fn connect(&self, _interfaces: Interfaces) -> Result<Box<dyn Connection + '_>> {
        self.0.lock().unwrap().connects += 1;
        Ok(Box::new(MockConnection(Arc::clone(&self.0))))
    }
}

pub struct MockConnection(Shared);

impl Connection for MockConnection {
    fn management(&mut self) -> Result<Box<dyn ManagementOps + '_>> {
        Ok(Box::new(MockMgmt(Arc::clone(&self.0))))
    }

    fn otp(&mut self) -> Result<Box<dyn OtpOps + '_>> {
        Ok(Box::new(MockOtp(Arc::clone(&self.0))))
    }

    fn piv(&mut self) -> Result<Box<dyn PivOps + '_>> {
        Ok(Box::new(MockPiv(Arc::clone(&self.0))))
    }

    fn fido(&mut self) -> Result<Box<dyn FidoOps + '_>> {
        Ok(Box::new(MockFido(Arc::clone(&self.0))))
    }
}

struct MockMgmt(Shared);

impl ManagementOps for MockMgmt {
    fn read_info(&mut self) -> Result<DeviceInfo> {
        Ok(self.0.lock().unwrap().info.clone())
    }

    fn write_config(
        &mut self,
        config: &DeviceConfig,
        _reboot: bool,
        lock_code: Option<&[u8; 16]>,
    ) -> core::result::Result<(), MgmtRefusal> {
        let mut state = self.0.lock().unwrap();

        if let Some(device_code) = state.lock_code {
            match lock_code {
                None => return Err(MgmtRefusal::ConfigurationLocked),
                Some(code) if *code != device_code => return Err(MgmtRefusal::WrongLockCode),
                Some(_) => {}
            }
        }

        state.info.usb_enabled = config.usb_enabled;
        state.info.nfc_enabled = config.nfc_enabled;
        Ok(())
    }
}

struct MockOtp(Shared);

impl OtpOps for MockOtp {
    fn serial(&mut self) -> Result<u32> {
        Ok(SERIAL)
    }

    fn slot_status(&mut self) -> Result<[bool; 2]> {
        let state = self.0.lock().unwrap();
        Ok([state.slots[0].is_some(), state.slots[1].is_some()])
    }

    fn put_slot(
        &mut self,
        slot: Slot,
        config: &SlotConfig,
    ) -> core::result::Result<(), OtpRefusal> {
        let mut state = self.0.lock().unwrap();
        if state.otp_write_fails {
            return Err(OtpRefusal::WriteFailed);
        }
        state.slots[slot_index(slot)] = Some(config.clone());
        Ok(())
    }

    fn delete_slot(&mut self, slot: Slot) -> core::result::Result<(), OtpRefusal> {
        self.0.lock().unwrap().slots[slot_index(slot)] = None;
        Ok(())
    }

    fn swap_slots(&mut self) -> core::result::Result<(), OtpRefusal> {
        self.0.lock().unwrap().slots.swap(0, 1);
        Ok(())
    }
}

fn slot_index(slot: Slot) -> usize {
    match slot {
        Slot::One => 0,
        Slot::Two => 1,
    }
}

struct MockPiv(Shared);

impl PivOps for MockPiv {
    fn pivman(&mut self) -> Result<PivmanData> {
        let state = self.0.lock().unwrap();
        Ok(PivmanData {
            has_protected_key: state.protected,
            has_derived_key: false,
            has_stored_key: state.protected,
            puk_blocked: state.puk_tries == 0,
        })
    }

    fn pin_attempts(&mut self) -> Result<u8> {
        Ok(self.0.lock().unwrap().pin_tries)
    }

    fn puk_attempts(&mut self) -> Result<u8> {
        Ok(self.0.lock().unwrap().puk_tries)
    }

    fn verify_pin(&mut self, pin: &[u8]) -> core::result::Result<(), PivRefusal> {
        let mut state = self.0.lock().unwrap();
        state.verify_calls += 1;

        if state.pin_tries == 0 {
            return Err(PivRefusal::AuthBlocked);
        }

        if pin == state.pin.as_bytes() {
            state.pin_tries = 3;
            Ok(())
        } else {
            state.pin_tries -= 1;
            Err(PivRefusal::InvalidPin)
        }
    }

    fn authenticate(&mut self, key: &MgmKey) -> core::result::Result<(), PivRefusal> {
        let mut state = self.0.lock().unwrap();
        state.authenticate_calls += 1;

        if key.as_ref() == state.mgm_key.as_slice() {
            Ok(())
        } else {
            Err(PivRefusal::AuthenticationFailed)
        }
    }

    fn generate_key(
        &mut self,
        slot: SlotId,
        algorithm: AlgorithmId,
        _pin_policy: PinPolicy,
        _touch_policy: TouchPolicy,
    ) -> core::result::Result<Vec<u8>, PivRefusal> {
        let mut state = self.0.lock().unwrap();
        state.keys.push(slot);
        Ok(vec![0x30, 0x02, u8::from(slot), u8::from(algorithm)])
    }

    fn self_signed_certificate(
        &mut self,
        _slot: SlotId,
        public_key: &[u8],
        common_name: &str,
        _not_before: Date,
        _not_after: Date,
    ) -> core::result::Result<Vec<u8>, PivRefusal> {
        let mut der = public_key.to_vec();
        der.extend_from_slice(common_name.as_bytes());
        Ok(der)
    }

    fn put_certificate(
        &mut self,
        slot: SlotId,
        der: &[u8],
    ) -> core::result::Result<(), PivRefusal> {
        let mut state = self.0.lock().unwrap();
        if state.refuse_cert_store {
            return Err(PivRefusal::SecurityCondition);
        }
        state.put_cert(slot, der.to_vec());
        Ok(())
    }

    fn certificate(&mut self, slot: SlotId) -> Result<Option<Vec<u8>>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .stored_cert(slot)
            .map(|der| der.to_vec()))
    }

    fn certificates(&mut self) -> Result<Vec<CertSummary>> {
        let state = self.0.lock().unwrap();
        Ok(state
            .certs
            .iter()
            .map(|(slot, _)| CertSummary {
                slot: *slot,
                subject: "CN=test".into(),
                issuer: "CN=test".into(),
                valid_from: "2024-01-01".into(),
                valid_to: "2030-01-01".into(),
            })
            .collect())
    }

    fn delete_certificate(&mut self, slot: SlotId) -> core::result::Result<(), PivRefusal> {
        self.0.lock().unwrap().certs.retain(|(s, _)| *s != slot);
        Ok(())
    }

    fn put_key(&mut self, slot: SlotId, _der: &[u8]) -> core::result::Result<(), PivRefusal> {
        self.0.lock().unwrap().keys.push(slot);
        Ok(())
    }

    fn put_object(&mut self, id: ObjectId, data: &[u8]) -> core::result::Result<(), PivRefusal> {
        self.0.lock().unwrap().put_obj(id, data.to_vec());
        Ok(())
    }

    fn change_pin(&mut self, old: &[u8], new: &[u8]) -> core::result::Result<(), PivRefusal> {
        let mut state = self.0.lock().unwrap();

        if state.pin_tries == 0 {
            return Err(PivRefusal::AuthBlocked);
        }

        if old == state.pin.as_bytes() {
            state.pin = String::from_utf8_lossy(new).into_owned();
            state.pin_tries = 3;
            Ok(())
        } else {
            state.pin_tries -= 1;
            Err(PivRefusal::InvalidPin)
        }
    }

    fn change_puk(&mut self, old: &[u8], new: &[u8]) -> core::result::Result<(), PivRefusal> {
        let mut state = self.0.lock().unwrap();

        if state.puk_tries == 0 {
            return Err(PivRefusal::AuthBlocked);
        }

        if old == state.puk.as_bytes() {
            state.puk = String::from_utf8_lossy(new).into_owned();
            state.puk_tries = 3;
            Ok(())
        } else {
            state.puk_tries -= 1;
            Err(PivRefusal::InvalidPin)
        }
    }

    fn unblock_pin(
        &mut self,
        puk: &[u8],
        new_pin: &[u8],
    ) -> core::result::Result<(), PivRefusal> {
        let mut state = self.0.lock().unwrap();

        if state.puk_tries == 0 {
            return Err(PivRefusal::AuthBlocked);
        }

        if puk == state.puk.as_bytes() {
            state.pin = String::from_utf8_lossy(new_pin).into_owned();
            state.pin_tries = 3;
            state.puk_tries = 3;
            Ok(())
        } else {
            state.puk_tries -= 1;
            Err(PivRefusal::InvalidPin)
        }
    }

    fn set_mgm_key(
        &mut self,
        key: &MgmKey,
        _require_touch: bool,
        protect: bool,
    ) -> core::result::Result<(), PivRefusal> {
        let mut state = self.0.lock().unwrap();
        state.mgm_key = key.as_ref().to_vec();
        state.protected = protect;
        Ok(())
    }

    fn reset(&mut self) -> core::result::Result<(), PivRefusal> {
        let mut state = self.0.lock().unwrap();
        state.pin = DEFAULT_PIN.into();
        state.pin_tries = 3;
        state.puk = DEFAULT_PUK.into();
        state.puk_tries = 3;
        state.certs.clear();
        state.keys.clear();
        state.objects.clear();
        state.protected = false;
        Ok(())
    }
}

struct MockFido(Shared);

impl FidoOps for MockFido {
    fn has_pin(&mut self) -> Result<bool> {
        Ok(self.0.lock().unwrap().fido_pin.is_some())
    }

    fn pin_retries(&mut self) -> core::result::Result<u8, FidoRefusal> {
        let state = self.0.lock().unwrap();
        if state.fido_blocked {
            return Err(FidoRefusal::PinBlocked);
        }
        if state.fido_auth_blocked {
            return Err(FidoRefusal::PinAuthBlocked);
        }
        Ok(state.fido_retries)
    }

    fn set_pin(&mut self, new_pin: &str) -> core::result::Result<(), FidoRefusal> {
        let mut state = self.0.lock().unwrap();
        if new_pin.len() > 63 {
            return Err(FidoRefusal::InvalidLength);
        }
        if new_pin.len() < 4 {
            return Err(FidoRefusal::PinPolicyViolation);
        }
        state.fido_pin = Some(new_pin.into());
        Ok(())
    }

    fn change_pin(
        &mut self,
        current: &str,
        new: &str,
    ) -> core::result::Result<(), FidoRefusal> {
        let mut state = self.0.lock().unwrap();

        if state.fido_blocked {
            return Err(FidoRefusal::PinBlocked);
        }
        if state.fido_auth_blocked {
            return Err(FidoRefusal::PinAuthBlocked);
        }
        if new.len() > 63 {
            return Err(FidoRefusal::InvalidLength);
        }
        if state.fido_pin.as_deref() != Some(current) {
            state.fido_retries = state.fido_retries.saturating_sub(1);
            return Err(FidoRefusal::PinInvalid);
        }

        state.fido_pin = Some(new.into());
        Ok(())
    }

    fn reset(&mut self) -> core::result::Result<(), FidoRefusal> {
        let mut state = self.0.lock().unwrap();
        state.fido_pin = None;
        state.fido_retries = 8;
        state.fido_blocked = false;
        state.fido_auth_blocked = false;
        Ok(())
    }
}

/// Registry double recording uploads, with a switchable failure mode.
#[derive(Default)]
pub struct RegistryState {
    pub fail_with: Option<Vec<String>>,
    pub uploads: Vec<Vec<u8>>,
}

pub struct MockRegistry(pub Arc<Mutex<RegistryState>>);

impl CredentialRegistry for MockRegistry {
    fn upload(
        &self,
        _key: &[u8; 16],
        public_id: &[u8],
        _private_id: &[u8; 6],
        _serial: Option<Serial>,
        _client_tag: &str,
    ) -> core::result::Result<String, UploadError> {
        let mut registry = self.0.lock().unwrap();

        if let Some(errors) = &registry.fail_with {
            return Err(UploadError {
                errors: errors.clone(),
            });
        }

        registry.uploads.push(public_id.to_vec());
        Ok(format!(
            "https://upload.example.com/{}",
            yubikey_manager::otp::modhex_encode(public_id)
        ))
    }
}

/// Parser double understanding a line-oriented test format:
/// `cert <subject> <issuer>` and `key <name>` lines.
pub struct MockParser;

impl CertParser for MockParser {
    fn parse_certificates(
        &self,
        data: &[u8],
        _password: Option<&str>,
    ) -> core::result::Result<Vec<ParsedCertificate>, ParseRejected> {
        let text = std::str::from_utf8(data).map_err(|_| ParseRejected)?;

        let certs: Vec<ParsedCertificate> = text
            .lines()
            .filter_map(|line| {
                let mut words = line.split_whitespace();
                match (words.next(), words.next(), words.next()) {
                    (Some("cert"), Some(subject), Some(issuer)) => Some(ParsedCertificate {
                        subject: subject.to_string(),
                        issuer: issuer.to_string(),
                        der: line.as_bytes().to_vec(),
                    }),
                    _ => None,
                }
            })
            .collect();

        if certs.is_empty() {
            Err(ParseRejected)
        } else {
            Ok(certs)
        }
    }

    fn parse_private_key(
        &self,
        data: &[u8],
        _password: Option<&str>,
    ) -> core::result::Result<ParsedKey, ParseRejected> {
        let text = std::str::from_utf8(data).map_err(|_| ParseRejected)?;

        text.lines()
            .find(|line| line.starts_with("key "))
            .map(|line| ParsedKey::new(line.as_bytes().to_vec()))
            .ok_or(ParseRejected)
    }
}

/// Event sink recording notifications.
pub struct MockSink(pub Arc<Mutex<Vec<Event>>>);

impl EventSink for MockSink {
    fn notify(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}

/// A manager wired to fresh mock state, plus handles to inspect it.
pub struct Fixture {
    pub state: Shared,
    pub registry: Arc<Mutex<RegistryState>>,
    pub events: Arc<Mutex<Vec<Event>>>,
    pub manager: Manager,
}

pub fn fixture() -> Fixture {
    let state = Arc::new(Mutex::new(MockState::new()));
    let registry = Arc::new(Mutex::new(RegistryState::default()));
    let events = Arc::new(Mutex::new(Vec::new()));

    let manager = Manager::new(
        Box::new(MockConnector(Arc::clone(&state))),
        Box::new(MockParser),
        Box::new(MockRegistry(Arc::clone(&registry))),
        Arc::new(MockSink(Arc::clone(&events))),
    );

    Fixture {
        state,
        registry,
        events,
        manager,
    }
}

pub fn connects(fixture: &Fixture) -> usize {
    fixture.state.lock().unwrap().connects
}
