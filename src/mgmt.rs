//! Management application: device configuration writes

use crate::{
    device::{Applications, DeviceInfo},
    error::{Error, Result},
};

/// Length of a configuration lock code in bytes.
pub const LOCK_CODE_LEN: usize = 16;

/// Desired per-transport application configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfig {
    /// Applications to enable over USB.
    pub usb_enabled: Applications,

    /// Applications to enable over NFC.
    pub nfc_enabled: Applications,
}

/// Device-side refusals of a configuration write.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MgmtRefusal {
    /// The supplied lock code failed verification; there is no retry counter.
    WrongLockCode,

    /// The configuration is locked and no lock code was supplied.
    ConfigurationLocked,

    /// Any other refusal, with the device-reported reason.
    Failed(String),
}

impl From<MgmtRefusal> for Error {
    fn from(refusal: MgmtRefusal) -> Error {
        match refusal {
            MgmtRefusal::WrongLockCode => Error::WrongLockCode,
            MgmtRefusal::ConfigurationLocked => Error::ConfigurationLocked,
            MgmtRefusal::Failed(reason) => Error::DeviceRefused { reason },
        }
    }
}

/// Management application session operations, implemented by the transport
/// backend.
pub trait ManagementOps {
    /// Read the device identity and capability snapshot.
    fn read_info(&mut self) -> Result<DeviceInfo>;

    /// Write the device configuration. `reboot` requests that the new
    /// configuration persist across a USB interface reset.
    fn write_config(
        &mut self,
        config: &DeviceConfig,
        reboot: bool,
        lock_code: Option<&[u8; LOCK_CODE_LEN]>,
    ) -> core::result::Result<(), MgmtRefusal>;
}

/// Decode a configuration lock code, requiring exactly 16 bytes of hex.
pub(crate) fn parse_lock_code(code: &str) -> Result<[u8; LOCK_CODE_LEN]> {
    let bytes = hex::mixed::decode_vec(code).map_err(|_| Error::LockCodeBadLength)?;
    bytes.try_into().map_err(|_| Error::LockCodeBadLength)
}
