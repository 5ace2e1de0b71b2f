//! Cache keys for generated comments
//!
//! A key looks like `alice:qwen3-coder-480b:update:3f2a9c0d41e7b658`. The readable prefix
//! scopes entries per tenant, model and mode; the suffix is the first 8 bytes of a SHA-256
//! digest over the request's content fields.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::request::{CommentRequest, RequestContext};

/// Bytes of the SHA-256 digest kept in the key (16 hex characters)
const DIGEST_BYTES: usize = 8;

const ANONYMOUS_TENANT: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    text: String,
    digest: String,
}

impl CacheKey {
    /// Key for `request` served by `model` on behalf of `ctx`.
    pub fn for_request(request: &CommentRequest, model: &str, ctx: &RequestContext) -> Self {
        let digest = content_digest(request);

        let tenant = if ctx.tenant.trim().is_empty() {
            ANONYMOUS_TENANT
        } else {
            ctx.tenant.as_str()
        };
        // ':' separates segments, so it must not appear inside one
        let model = model.replace(':', "-");

        let text = format!(
            "{}:{}:{}:{}",
            tenant,
            model,
            request.mode.as_key_segment(),
            digest
        );

        Self { text, digest }
    }

    /// Truncated content digest (16 lowercase hex characters)
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn content_digest(request: &CommentRequest) -> String {
    let mut hasher = Sha256::new();
    for field in [
        request.old_method.as_deref(),
        request.old_comment.as_deref(),
        Some(request.new_method.as_str()),
        request.rag_example.as_deref(),
    ] {
        hasher.update(field.unwrap_or("").as_bytes());
        // Terminator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0u8]);
    }
    let hash = hasher.finalize();
    hex::encode(&hash[..DIGEST_BYTES])
}
