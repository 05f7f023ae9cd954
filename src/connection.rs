//! Scoped device connections and the transport boundary
//!
//! The raw transport (reader enumeration, APDU framing, USB/NFC plumbing) is
//! not implemented here: a backend supplies it by implementing [`Connector`]
//! and [`Connection`]. This module owns the orchestration side of the
//! contract: interface filtering, the exactly-one-device invariant, and the
//! scoped-resource rule that a connection is closed on every exit path
//! (connections close when dropped; backends must make close idempotent).

use crate::{
    device::Fingerprint,
    error::{Error, Result},
    fido::FidoOps,
    mgmt::ManagementOps,
    otp::OtpOps,
    piv::PivOps,
};
use bitflags::bitflags;
use log::info;
use serde::{Serialize, Serializer};

bitflags! {
    /// USB transport interfaces a connection may be restricted to.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Interfaces: u8 {
        /// Keyboard-emulation interface used by the OTP application.
        const OTP = 0x01;

        /// FIDO HID interface.
        const FIDO = 0x02;

        /// Smartcard (CCID) interface used by PIV and management.
        const CCID = 0x04;
    }
}

impl Serialize for Interfaces {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter_names().map(|(name, _)| name))
    }
}

/// Result of a cheap device-presence poll.
#[derive(Clone, Debug)]
pub struct Scan {
    /// Number of attached devices.
    pub devices: usize,

    /// Discriminator for the current insertion/configuration state.
    pub fingerprint: Fingerprint,
}

/// Transport backend capable of polling for and connecting to devices.
pub trait Connector {
    /// Cheaply poll device presence and the current state fingerprint
    /// without opening an application-level connection.
    fn scan(&self) -> Result<Scan>;

    /// Open a connection to the attached device, restricted to the given
    /// interfaces. Backends do not enforce the exactly-one-device invariant;
    /// callers go through [`open`].
    fn connect(&self, interfaces: Interfaces) -> Result<Box<dyn Connection + '_>>;
}

/// An open, exclusive connection to the attached device.
///
/// At most one application session is active at a time; sessions borrow the
/// connection and cannot outlive it. Dropping the connection closes it on
/// every exit path.
pub trait Connection {
    /// Open a management application session.
    fn management(&mut self) -> Result<Box<dyn ManagementOps + '_>>;

    /// Open an OTP application session.
    fn otp(&mut self) -> Result<Box<dyn OtpOps + '_>>;

    /// Open a PIV application session.
    fn piv(&mut self) -> Result<Box<dyn PivOps + '_>>;

    /// Open a FIDO application session.
    fn fido(&mut self) -> Result<Box<dyn FidoOps + '_>>;
}

/// Open a connection after checking the exactly-one-device invariant.
///
/// Fails with [`Error::DeviceAbsent`] or [`Error::MultipleDevices`] before
/// any application-level call is attempted.
pub fn open(connector: &dyn Connector, interfaces: Interfaces) -> Result<Box<dyn Connection + '_>> {
    let scan = connector.scan()?;

    match scan.devices {
        0 => Err(Error::DeviceAbsent),
        1 => {
            info!("connecting with interfaces {:?}", interfaces);
            connector.connect(interfaces)
        }
        _ => Err(Error::MultipleDevices),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names() {
        let all = Interfaces::all();
        let names: Vec<_> = all.iter_names().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["OTP", "FIDO", "CCID"]);
    }
}
