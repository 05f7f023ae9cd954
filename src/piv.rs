//! PIV application: slots, key algorithms, session operations

use crate::{
    error::{Error, Result},
    mgm::{MgmKey, MgmType},
    policy::{PinPolicy, TouchPolicy},
};
use serde::Serialize;
use std::{
    fmt::{self, Display},
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

/// ID of a PIV data object.
pub type ObjectId = u32;

/// PIV certificate/key slots exposed to callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum SlotId {
    /// Authentication slot (9a): system login and similar. The end user PIN
    /// is required once per session for private key operations.
    Authentication,

    /// Digital signature slot (9c). The PIN must be submitted immediately
    /// before every sign operation.
    Signature,

    /// Key management slot (9d): encryption for confidentiality.
    KeyManagement,

    /// Card authentication slot (9e): physical access. No PIN required.
    CardAuthentication,
}

impl SlotId {
    /// All caller-visible slots, in key-reference order.
    pub const ALL: [SlotId; 4] = [
        SlotId::Authentication,
        SlotId::Signature,
        SlotId::KeyManagement,
        SlotId::CardAuthentication,
    ];
}

impl From<SlotId> for u8 {
    fn from(slot: SlotId) -> u8 {
        match slot {
            SlotId::Authentication => 0x9a,
            SlotId::Signature => 0x9c,
            SlotId::KeyManagement => 0x9d,
            SlotId::CardAuthentication => 0x9e,
        }
    }
}

impl TryFrom<u8> for SlotId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x9a => Ok(SlotId::Authentication),
            0x9c => Ok(SlotId::Signature),
            0x9d => Ok(SlotId::KeyManagement),
            0x9e => Ok(SlotId::CardAuthentication),
            _ => Err(Error::InvalidInput { field: "slot" }),
        }
    }
}

impl Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::Authentication => f.write_str("AUTHENTICATION"),
            SlotId::Signature => f.write_str("SIGNATURE"),
            SlotId::KeyManagement => f.write_str("KEY_MANAGEMENT"),
            SlotId::CardAuthentication => f.write_str("CARD_AUTH"),
        }
    }
}

impl FromStr for SlotId {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "AUTHENTICATION" => Ok(SlotId::Authentication),
            "SIGNATURE" => Ok(SlotId::Signature),
            "KEY_MANAGEMENT" => Ok(SlotId::KeyManagement),
            "CARD_AUTH" => Ok(SlotId::CardAuthentication),
            _ => Err(Error::InvalidInput { field: "slot" }),
        }
    }
}

/// Asymmetric key algorithms for generated slot keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum AlgorithmId {
    /// 1024-bit RSA.
    Rsa1024,

    /// 2048-bit RSA.
    Rsa2048,

    /// ECDSA with the NIST P256 curve.
    EccP256,

    /// ECDSA with the NIST P384 curve.
    EccP384,
}

impl From<AlgorithmId> for u8 {
    fn from(id: AlgorithmId) -> u8 {
        match id {
            AlgorithmId::Rsa1024 => 0x06,
            AlgorithmId::Rsa2048 => 0x07,
            AlgorithmId::EccP256 => 0x11,
            AlgorithmId::EccP384 => 0x14,
        }
    }
}

impl FromStr for AlgorithmId {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "RSA1024" => Ok(AlgorithmId::Rsa1024),
            "RSA2048" => Ok(AlgorithmId::Rsa2048),
            "ECCP256" => Ok(AlgorithmId::EccP256),
            "ECCP384" => Ok(AlgorithmId::EccP384),
            _ => Err(Error::InvalidInput { field: "algorithm" }),
        }
    }
}

/// Stored-credential metadata for the PIV application, read live from the
/// device's admin/protected data objects.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PivmanData {
    /// Management key is stored in a PIN-protected data object.
    pub has_protected_key: bool,

    /// Management key is derived from the PIN via a stored salt.
    pub has_derived_key: bool,

    /// Management key material is stored on the device.
    pub has_stored_key: bool,

    /// The PUK retry counter is exhausted.
    pub puk_blocked: bool,
}

impl PivmanData {
    /// Administration type implied by the stored metadata. Protected keys
    /// take precedence over a leftover derivation salt.
    pub fn mgm_type(&self) -> MgmType {
        if self.has_protected_key {
            MgmType::Protected
        } else if self.has_derived_key {
            MgmType::Derived
        } else {
            MgmType::Manual
        }
    }
}

/// Summary of a certificate stored in a slot, as reported by the backend.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CertSummary {
    /// Slot holding the certificate.
    pub slot: SlotId,

    /// Subject common name.
    pub subject: String,

    /// Issuer common name.
    pub issuer: String,

    /// Validity start, ISO 8601 date.
    pub valid_from: String,

    /// Validity end, ISO 8601 date.
    pub valid_to: String,
}

/// Calendar date used for certificate validity bounds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct Date {
    /// Year (proleptic Gregorian).
    pub year: u16,

    /// Month, 1-12.
    pub month: u8,

    /// Day of month, 1-based.
    pub day: u8,
}

impl Date {
    /// Parse a `YYYY-MM-DD` date, validating calendar ranges.
    pub fn parse_iso8601(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidDate {
            date: input.to_string(),
        };

        let mut parts = input.split('-');
        let year = parts.next().ok_or_else(invalid)?;
        let month = parts.next().ok_or_else(invalid)?;
        let day = parts.next().ok_or_else(invalid)?;

        if parts.next().is_some() || year.len() != 4 || month.len() != 2 || day.len() != 2 {
            return Err(invalid());
        }

        let year: u16 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        let day: u8 = day.parse().map_err(|_| invalid())?;

        if month < 1 || month > 12 || day < 1 || day > days_in_month(year, month) {
            return Err(invalid());
        }

        Ok(Self { year, month, day })
    }

    /// Today's date (UTC).
    pub fn today() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        civil_from_days((secs / 86_400) as i64)
    }
}

impl Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Convert days since the Unix epoch to a civil date
/// (Howard Hinnant's `civil_from_days` algorithm).
fn civil_from_days(days: i64) -> Date {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = if month <= 2 { year + 1 } else { year };

    Date {
        year: year as u16,
        month,
        day,
    }
}

/// Device-side refusals of PIV commands. The authorization engine translates
/// these into the crate error taxonomy, re-querying retry counters where the
/// taxonomy demands a fresh value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PivRefusal {
    /// Wrong PIN or PUK; the device decremented its retry counter as a side
    /// effect of the attempt.
    InvalidPin,

    /// The relevant retry counter is exhausted.
    AuthBlocked,

    /// Management key mutual authentication failed.
    AuthenticationFailed,

    /// Security condition not satisfied: the command demands authorization
    /// proof freshly bound to this call.
    SecurityCondition,

    /// The device rejected the command parameters.
    IncorrectParameters,

    /// Any other refusal, with the device-reported reason.
    Failed(String),
}

/// PIV application session operations, implemented by the transport backend.
///
/// Retry counters and stored-credential metadata are always re-queried from
/// the device, never cached on the session.
pub trait PivOps {
    /// Read the stored-credential metadata (pivman data objects).
    fn pivman(&mut self) -> Result<PivmanData>;

    /// Remaining PIN verification attempts.
    fn pin_attempts(&mut self) -> Result<u8>;

    /// Remaining PUK verification attempts.
    fn puk_attempts(&mut self) -> Result<u8>;

    /// Verify the PIN.
    fn verify_pin(&mut self, pin: &[u8]) -> core::result::Result<(), PivRefusal>;

    /// Mutually authenticate with the management key.
    fn authenticate(&mut self, key: &MgmKey) -> core::result::Result<(), PivRefusal>;

    /// Generate an asymmetric key in a slot, returning the public key (DER
    /// SubjectPublicKeyInfo).
    fn generate_key(
        &mut self,
        slot: SlotId,
        algorithm: AlgorithmId,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
    ) -> core::result::Result<Vec<u8>, PivRefusal>;

    /// Build a self-signed certificate for a freshly generated key, signing
    /// on the device. Returns the certificate in DER form.
    fn self_signed_certificate(
        &mut self,
        slot: SlotId,
        public_key: &[u8],
        common_name: &str,
        not_before: Date,
        not_after: Date,
    ) -> core::result::Result<Vec<u8>, PivRefusal>;

    /// Store a certificate (DER) in a slot.
    fn put_certificate(&mut self, slot: SlotId, der: &[u8])
        -> core::result::Result<(), PivRefusal>;

    /// Read the certificate stored in a slot, if any.
    fn certificate(&mut self, slot: SlotId) -> Result<Option<Vec<u8>>>;

    /// Summaries of all stored certificates.
    fn certificates(&mut self) -> Result<Vec<CertSummary>>;

    /// Delete the certificate stored in a slot.
    fn delete_certificate(&mut self, slot: SlotId) -> core::result::Result<(), PivRefusal>;

    /// Import a private key (DER) into a slot.
    fn put_key(&mut self, slot: SlotId, der: &[u8]) -> core::result::Result<(), PivRefusal>;

    /// Write a PIV data object.
    fn put_object(&mut self, id: ObjectId, data: &[u8]) -> core::result::Result<(), PivRefusal>;

    /// Change the PIN, verifying the old one in the same command.
    fn change_pin(&mut self, old: &[u8], new: &[u8]) -> core::result::Result<(), PivRefusal>;

    /// Change the PUK, verifying the old one in the same command.
    fn change_puk(&mut self, old: &[u8], new: &[u8]) -> core::result::Result<(), PivRefusal>;

    /// Reset a blocked PIN using the PUK.
    fn unblock_pin(&mut self, puk: &[u8], new_pin: &[u8])
        -> core::result::Result<(), PivRefusal>;

    /// Install a new management key. `protect` stores it in the
    /// PIN-protected data object instead of handing it to the user.
    fn set_mgm_key(
        &mut self,
        key: &MgmKey,
        require_touch: bool,
        protect: bool,
    ) -> core::result::Result<(), PivRefusal>;

    /// Reset the PIV application to factory state.
    fn reset(&mut self) -> core::result::Result<(), PivRefusal>;
}
