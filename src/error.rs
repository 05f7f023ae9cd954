//! Error types

use std::fmt;

/// Result type with the crate-local [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported by device orchestration operations.
///
/// Device-side refusals are always translated into one of these variants
/// rather than surfaced verbatim; truly unexpected backend failures are
/// reported as [`Error::Unknown`] with a human-readable message only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// No device is currently attached.
    DeviceAbsent,

    /// More than one device is attached; operations require exactly one.
    MultipleDevices,

    /// The transport layer failed before an application-level call was made.
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The operation requires a PIN and none was supplied, or the device
    /// demanded fresh PIN proof at the point of a protected call.
    PinRequired,

    /// The operation requires a management key and none was supplied.
    ManagementKeyRequired,

    /// The supplied management key is not 48 hex characters (24 bytes),
    /// or decodes to a known-weak key.
    ManagementKeyBadFormat,

    /// The replacement management key is malformed (bad hex or wrong length).
    NewManagementKeyBadFormat,

    /// The supplied configuration lock code does not hex-decode to exactly
    /// 16 bytes.
    LockCodeBadLength,

    /// The device rejected the PIN; `tries` is the device's post-failure
    /// retry counter. `tries == 0` means the PIN is now locked.
    WrongPin {
        /// Remaining verification attempts, queried after the failure.
        tries: u8,
    },

    /// The device rejected the PUK; `tries` is the device's post-failure
    /// retry counter.
    WrongPuk {
        /// Remaining verification attempts, queried after the failure.
        tries: u8,
    },

    /// The PIN retry counter is exhausted and the device refuses further
    /// verification attempts.
    PinLocked,

    /// The device rejected the management key during mutual authentication.
    WrongManagementKey,

    /// The device rejected the supplied configuration lock code. There is no
    /// retry counter for lock codes.
    WrongLockCode,

    /// The device configuration is locked and no lock code was supplied.
    ConfigurationLocked,

    /// The device refused a command for a reason outside the authorization
    /// taxonomy.
    DeviceRefused {
        /// Device-reported reason.
        reason: String,
    },

    /// The device rejected the parameters of a command.
    IncorrectParameters,

    /// An input failed validation before any device call was made.
    InvalidInput {
        /// Name of the offending field.
        field: &'static str,
    },

    /// An expiration date string is not a valid `YYYY-MM-DD` date.
    InvalidDate {
        /// The rejected input.
        date: String,
    },

    /// Input data could not be parsed as a certificate or private key.
    ParseFailed,

    /// A requested object (e.g. a slot certificate) is not present on the
    /// device.
    NotFound,

    /// The credential registry rejected an upload; `errors` carries the
    /// registry's per-field validation errors.
    UploadRejected {
        /// Field-level errors reported by the registry.
        errors: Vec<String>,
    },

    /// The FIDO PIN violates the authenticator's length or policy rules.
    FidoPinTooLong,

    /// The authenticator rejected the current FIDO PIN.
    FidoWrongPin,

    /// FIDO PIN authentication is temporarily blocked; clears when the
    /// device is removed and re-inserted.
    FidoPinAuthBlocked,

    /// The FIDO PIN is blocked until the authenticator is reset.
    FidoPinBlocked,

    /// The authenticator refused the operation (e.g. reset outside the
    /// post-insertion window).
    FidoNotAllowed,

    /// The authenticator timed out waiting for a touch.
    FidoTouchTimeout,

    /// An unexpected failure, logged in full and reported with a message
    /// only.
    Unknown {
        /// Human-readable description.
        message: String,
    },
}

impl Error {
    /// Stable identifier for this error at the serialization boundary.
    pub fn error_id(&self) -> &'static str {
        match self {
            Error::DeviceAbsent => "no_device",
            Error::MultipleDevices => "multiple_devices",
            Error::Transport { .. } => "open_device_failed",
            Error::PinRequired => "pin_required",
            Error::ManagementKeyRequired => "mgm_key_required",
            Error::ManagementKeyBadFormat => "mgm_key_bad_format",
            Error::NewManagementKeyBadFormat => "new_mgm_key_bad_format",
            Error::LockCodeBadLength => "lock_code_not_16_bytes",
            Error::WrongPin { .. } => "wrong_pin",
            Error::WrongPuk { .. } => "wrong_puk",
            Error::PinLocked => "pin_locked",
            Error::WrongManagementKey => "wrong_mgm_key",
            Error::WrongLockCode => "wrong_lock_code",
            Error::ConfigurationLocked => "interface_config_locked",
            Error::DeviceRefused { .. } => "device_refused",
            Error::IncorrectParameters => "incorrect_parameters",
            Error::InvalidInput { .. } => "invalid_input",
            Error::InvalidDate { .. } => "invalid_iso8601_date",
            Error::ParseFailed => "failed_parsing",
            Error::NotFound => "not_found",
            Error::UploadRejected { .. } => "upload_failed",
            Error::FidoPinTooLong => "fido_pin_too_long",
            Error::FidoWrongPin => "fido_wrong_pin",
            Error::FidoPinAuthBlocked => "fido_pin_auth_blocked",
            Error::FidoPinBlocked => "fido_pin_blocked",
            Error::FidoNotAllowed => "fido_not_allowed",
            Error::FidoTouchTimeout => "fido_touch_timeout",
            Error::Unknown { .. } => "unknown",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceAbsent => f.write_str("no device attached"),
            Error::MultipleDevices => f.write_str("multiple devices attached"),
            Error::Transport { message } => write!(f, "transport failure: {}", message),
            Error::PinRequired => f.write_str("PIN required"),
            Error::ManagementKeyRequired => f.write_str("management key required"),
            Error::ManagementKeyBadFormat => f.write_str("malformed management key"),
            Error::NewManagementKeyBadFormat => f.write_str("malformed new management key"),
            Error::LockCodeBadLength => f.write_str("lock code is not 16 bytes"),
            Error::WrongPin { tries } => write!(f, "wrong PIN ({} tries left)", tries),
            Error::WrongPuk { tries } => write!(f, "wrong PUK ({} tries left)", tries),
            Error::PinLocked => f.write_str("PIN locked"),
            Error::WrongManagementKey => f.write_str("wrong management key"),
            Error::WrongLockCode => f.write_str("wrong lock code"),
            Error::ConfigurationLocked => f.write_str("configuration locked"),
            Error::DeviceRefused { reason } => write!(f, "device refused: {}", reason),
            Error::IncorrectParameters => f.write_str("incorrect parameters"),
            Error::InvalidInput { field } => write!(f, "invalid input: {}", field),
            Error::InvalidDate { date } => write!(f, "invalid ISO 8601 date: {}", date),
            Error::ParseFailed => f.write_str("failed parsing certificate or key"),
            Error::NotFound => f.write_str("object not found"),
            Error::UploadRejected { errors } => {
                write!(f, "upload rejected: {}", errors.join(", "))
            }
            Error::FidoPinTooLong => f.write_str("FIDO PIN violates length or policy rules"),
            Error::FidoWrongPin => f.write_str("wrong FIDO PIN"),
            Error::FidoPinAuthBlocked => {
                f.write_str("FIDO PIN authentication is currently blocked; re-insert the device")
            }
            Error::FidoPinBlocked => f.write_str("FIDO PIN is blocked"),
            Error::FidoNotAllowed => f.write_str("operation not allowed"),
            Error::FidoTouchTimeout => f.write_str("timed out waiting for touch"),
            Error::Unknown { message } => write!(f, "unexpected failure: {}", message),
        }
    }
}

impl std::error::Error for Error {}
