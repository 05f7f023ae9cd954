//! Session and authorization orchestration for multi-application YubiKey
//! devices.
//!
//! This crate coordinates authenticated configuration operations against a
//! removable security key exposing several logical applications (device
//! management, OTP slots, PIV smartcard credentials, FIDO authenticator).
//! It owns the hard part of that job: a small security state machine over a
//! narrow, error-prone hardware protocol, where operations can fail
//! mid-sequence, authorization expires, and a wrong PIN has device-side
//! consequences (a decremented retry counter, eventual lockout) that must
//! be surfaced precisely.
//!
//! The raw transport, certificate parsing and credential-registry upload
//! are capabilities supplied by the embedder (see [`connection::Connector`],
//! [`certs::CertParser`], [`otp::CredentialRegistry`]); everything above
//! them — presence tracking, per-application sessions, authorization
//! proofs, operation sequencing and the touch-prompt supervisor — lives
//! here, entered through [`Manager`].
//!
//! Device mutation is not transactional: when a step of a sequenced
//! operation fails, completed prior steps are not rolled back. See
//! [`manager`] for how this is surfaced to callers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, trivial_casts, unused_qualifications)]

pub mod auth;
pub mod certs;
pub mod chuid;
pub mod connection;
pub mod device;
pub mod error;
pub mod fido;
pub mod manager;
pub mod mgm;
pub mod mgmt;
pub mod otp;
pub mod piv;
pub mod policy;
pub mod prompt;

pub use crate::{
    auth::{AuthState, Authorizer},
    connection::{Connection, Connector, Interfaces},
    device::{Applications, DeviceCache, DeviceInfo, FormFactor, Fingerprint, Serial, Version},
    error::{Error, Result},
    manager::Manager,
    mgm::MgmKey,
    piv::{AlgorithmId, SlotId},
    policy::{PinPolicy, TouchPolicy},
    prompt::{Event, EventSink},
};
