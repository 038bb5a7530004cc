//! Filedrop Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `FileRecord`, `User`, `ResumableSession`, `AuditEntry`
//! - **Use cases** - the upload, hashing, link, download, delete, quota,
//!   and cleanup orchestrations
//! - **Port definitions** - Traits for adapters: `IMetadataStore`,
//!   `IObjectStore`, `IDigestProvider`, `ILinkSigner`, `IPasswordHasher`,
//!   `IHashScheduler`
//! - **State machine** - the file lifecycle `pending -> stored -> hashed
//!   -> ready` / `failed`
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture
//! pattern. The domain module contains pure business logic with no
//! external dependencies. Ports define trait interfaces that adapter
//! crates implement. Use cases orchestrate domain entities through port
//! interfaces and are the only code that drives state transitions.

pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
