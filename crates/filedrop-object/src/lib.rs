//! Filedrop object storage adapters
//!
//! Implementations of the [`IObjectStore`] and [`IDigestProvider`] ports:
//! - [`S3ObjectStore`] - S3-compatible backends (AWS, MinIO, Garage)
//! - [`InMemoryObjectStore`] - in-process backend for tests and local
//!   smoke runs
//! - [`Sha256DigestProvider`] - streaming SHA-256 + byte count
//!
//! [`IObjectStore`]: filedrop_core::ports::IObjectStore
//! [`IDigestProvider`]: filedrop_core::ports::IDigestProvider

mod digest;
mod memory;
mod s3;

pub use digest::Sha256DigestProvider;
pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;
