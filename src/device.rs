//! Device identity, capability snapshots and the identity cache

use crate::{
    connection::{self, Connector, Interfaces},
    error::{Error, Result},
};
use bitflags::bitflags;
use log::{info, warn};
use serde::{Serialize, Serializer};
use std::fmt::{self, Display};

/// Device serial number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize)]
pub struct Serial(pub u32);

impl From<u32> for Serial {
    fn from(num: u32) -> Serial {
        Serial(num)
    }
}

impl From<Serial> for u32 {
    fn from(serial: Serial) -> u32 {
        serial.0
    }
}

impl Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Firmware version triple.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct Version {
    /// Major version component
    pub major: u8,

    /// Minor version component
    pub minor: u8,

    /// Patch version component
    pub patch: u8,
}

impl Version {
    /// Create a version from its components.
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

bitflags! {
    /// Set of logical applications on the device, per transport.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct Applications: u16 {
        /// One-time password slots.
        const OTP = 0x0001;

        /// CTAP1/U2F.
        const U2F = 0x0002;

        /// OpenPGP smartcard.
        const OPENPGP = 0x0008;

        /// PIV smartcard.
        const PIV = 0x0010;

        /// OATH credentials.
        const OATH = 0x0020;

        /// CTAP2/FIDO2.
        const FIDO2 = 0x0200;
    }
}

impl Applications {
    /// Look up a single application flag by its boundary name.
    pub fn by_name(name: &str) -> Option<Self> {
        Self::from_name(name)
    }
}

impl Serialize for Applications {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter_names().map(|(name, _)| name))
    }
}

/// Physical form factor as reported by the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum FormFactor {
    /// Unknown or unreported.
    Unknown,

    /// USB-A keychain.
    UsbAKeychain,

    /// USB-A nano.
    UsbANano,

    /// USB-C keychain.
    UsbCKeychain,

    /// USB-C nano.
    UsbCNano,

    /// USB-C with Lightning.
    UsbCLightning,

    /// USB-A biometric keychain.
    UsbABio,

    /// USB-C biometric keychain.
    UsbCBio,
}

impl Default for FormFactor {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Opaque discriminator for device presence plus configuration generation.
///
/// Equality comparison is the sole operation: two equal fingerprints mean
/// the insertion state has not changed since the last poll.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fingerprint(u64);

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Immutable snapshot of device identity and capabilities.
///
/// Created on refresh and superseded (never mutated) by the next refresh.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Display name of the device model.
    pub name: String,

    /// Firmware version.
    pub version: Version,

    /// Serial number, if the device reports one.
    pub serial: Option<Serial>,

    /// Applications supported over USB.
    pub usb_supported: Applications,

    /// Applications currently enabled over USB.
    pub usb_enabled: Applications,

    /// Applications supported over NFC.
    pub nfc_supported: Applications,

    /// Applications currently enabled over NFC.
    pub nfc_enabled: Applications,

    /// USB interfaces the device model exposes.
    pub usb_interfaces_supported: Interfaces,

    /// USB interfaces currently enabled.
    pub usb_interfaces_enabled: Interfaces,

    /// Physical form factor.
    pub form_factor: FormFactor,

    /// Whether the device configuration is protected by a lock code.
    pub configuration_locked: bool,
}

impl DeviceInfo {
    /// Whether this device accepts configuration writes (firmware 5.0.0 and
    /// later).
    pub fn supports_write_config(&self) -> bool {
        self.version >= Version::new(5, 0, 0)
    }
}

/// Cache of the last-observed device fingerprint and capability snapshot.
///
/// Serves repeated status queries without re-opening a connection as long as
/// the fingerprint is unchanged. Configuration writes must call
/// [`DeviceCache::invalidate`] so the next refresh re-reads the device.
#[derive(Default)]
pub struct DeviceCache {
    cached: Option<(Fingerprint, DeviceInfo)>,
}

impl DeviceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached snapshot, if any.
    pub fn current(&self) -> Option<&DeviceInfo> {
        self.cached.as_ref().map(|(_, info)| info)
    }

    /// Drop the cached fingerprint so the next refresh re-reads the device.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Poll device presence and return the current capability snapshot.
    ///
    /// If the fingerprint is unchanged since the last refresh the cached
    /// snapshot is returned without opening a connection. A violated
    /// exactly-one-device invariant fails without mutating the cache; a
    /// failed identity read clears it.
    pub fn refresh(&mut self, connector: &dyn Connector) -> Result<DeviceInfo> {
        let scan = connector.scan()?;

        if scan.devices == 0 {
            return Err(Error::DeviceAbsent);
        }

        if scan.devices > 1 {
            return Err(Error::MultipleDevices);
        }

        if let Some((fingerprint, info)) = &self.cached {
            if *fingerprint == scan.fingerprint {
                return Ok(info.clone());
            }
        }

        let info = match Self::read_info(connector) {
            Ok(info) => info,
            Err(e) => {
                warn!("failed reading device identity: {}", e);
                self.cached = None;
                return Err(e);
            }
        };

        info!("device state changed, new snapshot: {} {}", info.name, info.version);
        self.cached = Some((scan.fingerprint, info.clone()));
        Ok(info)
    }

    /// Open a short-lived connection and read the identity snapshot.
    /// The connection is closed before returning.
    fn read_info(connector: &dyn Connector) -> Result<DeviceInfo> {
        let mut conn = connection::open(connector, Interfaces::all())?;
        let info = conn.management()?.read_info();
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_gates_write_config() {
        let info = DeviceInfo {
            name: "YubiKey 5 NFC".into(),
            version: Version::new(5, 4, 3),
            serial: Some(Serial(7_654_321)),
            usb_supported: Applications::all(),
            usb_enabled: Applications::OTP | Applications::PIV,
            nfc_supported: Applications::all(),
            nfc_enabled: Applications::all(),
            usb_interfaces_supported: Interfaces::all(),
            usb_interfaces_enabled: Interfaces::all(),
            form_factor: FormFactor::UsbAKeychain,
            configuration_locked: false,
        };
        assert!(info.supports_write_config());

        let older = DeviceInfo {
            version: Version::new(4, 3, 7),
            ..info
        };
        assert!(!older.supports_write_config());

        assert!(Version::new(5, 0, 0) > Version::new(4, 9, 9));
    }

    #[test]
    fn application_names_round_trip() {
        assert_eq!(Applications::by_name("PIV"), Some(Applications::PIV));
        assert_eq!(Applications::by_name("FIDO2"), Some(Applications::FIDO2));
        assert_eq!(Applications::by_name("piv"), None);
    }

    #[test]
    fn fingerprint_equality_only() {
        assert_eq!(Fingerprint::from(1), Fingerprint::from(1));
        assert_ne!(Fingerprint::from(1), Fingerprint::from(2));
    }
}
