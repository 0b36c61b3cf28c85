use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("invalid media base url: {0}")]
    InvalidBaseUrl(String),
    #[error("object store failure: {0}")]
    Backend(String),
}

pub type ObjectStoreFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, ObjectStoreError>> + Send + 'a>>;

pub trait ObjectStore: Send + Sync {
    /// Returns a time-limited read URL for `key`.
    fn presign_read<'a>(&'a self, key: &'a str, ttl: Duration) -> ObjectStoreFuture<'a>;
}

/// Presigns `{base}/{key}?expires=<unix>&signature=<hex>` with HMAC-SHA256 over the key
/// and expiry.
#[derive(Debug, Clone)]
pub struct SignedUrlPresigner {
    base_url: Url,
    signing_secret: String,
}

impl SignedUrlPresigner {
    pub fn new(base_url: &str, signing_secret: impl Into<String>) -> Result<Self, ObjectStoreError> {
        let base_url =
            Url::parse(base_url).map_err(|err| ObjectStoreError::InvalidBaseUrl(err.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ObjectStoreError::InvalidBaseUrl(format!(
                "{base_url} must be an absolute http(s) url"
            )));
        }

        Ok(Self {
            base_url,
            signing_secret: signing_secret.into(),
        })
    }

    pub fn presign_at(
        &self,
        key: &str,
        ttl: Duration,
        now_unix_seconds: i64,
    ) -> Result<String, ObjectStoreError> {
        let key = validate_key(key)?;
        let ttl_seconds = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let expires = now_unix_seconds.saturating_add(ttl_seconds);
        let signature = sign_object_read(&self.signing_secret, key, expires);

        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ObjectStoreError::InvalidBaseUrl(self.base_url.to_string()))?;
            segments.pop_if_empty();
            segments.extend(key.split('/'));
        }
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);

        Ok(url.into())
    }

    pub fn verify(&self, key: &str, expires: i64, signature: &str, now_unix_seconds: i64) -> bool {
        if now_unix_seconds > expires {
            return false;
        }
        let expected = sign_object_read(&self.signing_secret, key, expires);
        constant_time_eq(&expected, signature)
    }
}

impl ObjectStore for SignedUrlPresigner {
    fn presign_read<'a>(&'a self, key: &'a str, ttl: Duration) -> ObjectStoreFuture<'a> {
        Box::pin(async move { self.presign_at(key, ttl, chrono::Utc::now().timestamp()) })
    }
}

fn validate_key(key: &str) -> Result<&str, ObjectStoreError> {
    let key = key.trim().trim_start_matches('/');
    if key.is_empty() || key.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(key)
}

fn sign_object_read(secret: &str, key: &str, expires: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts shared secret key of any size");
    mac.update(key.as_bytes());
    mac.update(&[0u8]);
    mac.update(expires.to_string().as_bytes());

    let digest = mac.finalize().into_bytes();
    to_lower_hex(digest.as_slice())
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    if left.len() != right.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (lhs, rhs) in left.as_bytes().iter().zip(right.as_bytes().iter()) {
        diff |= lhs ^ rhs;
    }

    diff == 0
}

fn to_lower_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
