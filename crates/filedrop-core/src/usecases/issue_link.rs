//! Link issuance use case
//!
//! Builds and signs download tokens. The token is stateless: no row is
//! written, the signature alone carries the permission. Single-use
//! enforcement is an HTTP-layer concern (an in-process nonce registry);
//! this use case only marks the intent on the returned link.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::domain::newtypes::FileId;
use crate::domain::{AuditEntry, AuditEvent, CoreError, FileState, User};
use crate::ports::{ILinkSigner, IMetadataStore, LinkClaims};

use super::{audit_best_effort, stamp_ip, RequestMeta};

/// Options for a link issuance
#[derive(Debug, Clone)]
pub struct IssueOptions {
    /// Requested token lifetime
    pub ttl: Duration,
    /// Reject the token after its first successful download
    pub single_use: bool,
}

/// A freshly issued download link
#[derive(Debug, Clone)]
pub struct IssuedLink {
    /// The signed token
    pub token: String,
    /// Absolute download URL rendered against the configured base
    pub url: String,
    /// The claims embedded in the token
    pub claims: LinkClaims,
    /// Whether the HTTP layer should arm single-use consumption
    pub single_use: bool,
}

/// Use case for issuing signed download links
pub struct IssueLinkUseCase {
    metadata: Arc<dyn IMetadataStore>,
    signer: Arc<dyn ILinkSigner>,
    base_url: String,
    max_ttl: Duration,
}

impl IssueLinkUseCase {
    /// Creates the use case with its collaborators and TTL policy
    pub fn new(
        metadata: Arc<dyn IMetadataStore>,
        signer: Arc<dyn ILinkSigner>,
        base_url: impl Into<String>,
        max_ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            signer,
            base_url: base_url.into(),
            max_ttl,
        }
    }

    /// Issues a signed link for `file_id` on behalf of `principal`
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id
    /// - `Forbidden` when `principal` is neither owner nor admin
    /// - `NotReady` unless the file is `ready`
    /// - `FileGone` when the file itself has expired
    /// - `Validation` for a TTL outside `[1s, max]`
    pub async fn execute(
        &self,
        principal: &User,
        file_id: FileId,
        options: IssueOptions,
        meta: &RequestMeta,
    ) -> Result<IssuedLink, CoreError> {
        // Step 1: TTL policy
        if options.ttl < Duration::seconds(1) || options.ttl > self.max_ttl {
            return Err(CoreError::Validation(format!(
                "link ttl must be within [1s, {}s]",
                self.max_ttl.num_seconds()
            )));
        }

        // Step 2: resolve and guard the file
        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or(CoreError::NotFound)?;

        if !file.manageable_by(principal) {
            return Err(CoreError::Forbidden);
        }
        let now = Utc::now();
        if file.is_expired(now) {
            return Err(CoreError::FileGone);
        }
        if file.state() != FileState::Ready {
            return Err(CoreError::NotReady);
        }

        // Step 3: sign
        let claims = LinkClaims {
            file_id,
            expires_at: now + options.ttl,
            nonce: *Uuid::new_v4().as_bytes(),
            password_salt: file.password_salt().copied(),
        };
        let token = self.signer.issue(&claims)?;
        let url = format!(
            "{}/download?token={}",
            self.base_url.trim_end_matches('/'),
            token
        );

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::LinkIssue, meta.correlation_id)
                .with_principal(principal.id())
                .with_resource(file_id)
                .with_metadata(json!({
                    "ttl_seconds": options.ttl.num_seconds(),
                    "single_use": options.single_use,
                })),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;

        tracing::info!(%file_id, ttl = options.ttl.num_seconds(), "download link issued");
        Ok(IssuedLink {
            token,
            url,
            claims,
            single_use: options.single_use,
        })
    }
}
