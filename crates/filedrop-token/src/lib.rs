//! Download-token crypto for Filedrop
//!
//! Implements the [`ILinkSigner`] and [`IPasswordHasher`] ports:
//! - [`HmacLinkSigner`] - MAC-protected, URL-safe download tokens
//! - [`Argon2PasswordHasher`] - password gating for protected downloads
//!
//! [`ILinkSigner`]: filedrop_core::ports::ILinkSigner
//! [`IPasswordHasher`]: filedrop_core::ports::IPasswordHasher

mod password;
mod signer;

pub use password::Argon2PasswordHasher;
pub use signer::HmacLinkSigner;
