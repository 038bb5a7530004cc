//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IMetadataStore`] - Durable file/user/session/audit state
//! - [`IObjectStore`] - Streaming blob storage (S3-compatible backends)
//! - [`IDigestProvider`] - SHA-256 + byte count of a stored object
//! - [`ILinkSigner`] / [`IPasswordHasher`] - Download-token crypto
//! - [`IHashScheduler`] - Hand-off from upload finalize to the hash worker

pub mod digest;
pub mod metadata_store;
pub mod object_store;
pub mod scheduler;
pub mod token;

pub use digest::{DigestResult, IDigestProvider};
pub use metadata_store::{IMetadataStore, ReserveOutcome};
pub use object_store::{bytestream_from, ByteStream, IObjectStore, ObjectDownload, ObjectMeta};
pub use scheduler::IHashScheduler;
pub use token::{ILinkSigner, IPasswordHasher, LinkClaims};
