// ABOUTME: Validated domain types shared by the bastion layers.
// ABOUTME: Login names, dial targets and key fingerprints.

mod fingerprint;
mod login;

pub use fingerprint::{Fingerprint, FingerprintError};
pub use login::{DELIMITER, Login, LoginError, Target};
