//! Request signing and verification.
//!
//! Every call from the orchestrator carries an `X-Inngest-Signature` header
//! of the form `t=<unix-seconds>&s=<hex-hmac-sha256>`. The MAC is computed
//! over the canonicalized body (see [`canonical`]) concatenated with the
//! decimal timestamp, keyed by the portion of the signing key after its
//! `signkey-<env>-` prefix.
//!
//! Verification accepts either the primary or the fallback signing key so
//! keys can be rotated without a deploy gap, and rejects signatures whose
//! timestamp is more than [`TIMESTAMP_WINDOW_SECS`] away from the current
//! clock. In dev mode verification always succeeds; a request from a
//! non-dev server is logged as a warning.

pub mod canonical;

pub use canonical::canonicalize;

use {
    crate::config::{Config, Mode},
    hmac::{Hmac, Mac as _},
    sha2::{Digest as _, Sha256},
    std::sync::Arc,
    subtle::ConstantTimeEq as _,
    thiserror::Error,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted distance between a signature timestamp and the clock.
pub const TIMESTAMP_WINDOW_SECS: i64 = 300;

const SIGNING_KEY_PREFIX: &str = "signkey-";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no signing key is configured")]
    MissingKey,
    #[error("request carries no signature header")]
    MissingSignature,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("malformed signing key: {0}")]
    MalformedKey(String),
}

/// Time source, swappable for tests.
pub trait Clock: Send + Sync {
    fn unix_seconds(&self) -> i64;
}

/// Wall-clock time source.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Verifier for inbound signatures and signer for outbound ones.
#[derive(Clone)]
pub struct SignatureVerifier {
    mode: Mode,
    signing_key: Option<String>,
    signing_key_fallback: Option<String>,
    clock: Arc<dyn Clock>,
}

impl SignatureVerifier {
    pub fn new(
        mode: Mode,
        signing_key: Option<String>,
        signing_key_fallback: Option<String>,
    ) -> Self {
        Self {
            mode,
            signing_key,
            signing_key_fallback,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.mode(),
            config.signing_key().map(str::to_string),
            config.signing_key_fallback().map(str::to_string),
        )
    }

    /// Replace the time source (useful for tests).
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Verify a request signature over the raw body.
    ///
    /// `server_kind` is the value of the `X-Inngest-Server-Kind` header, if
    /// present. In dev mode verification always succeeds, but a request
    /// from a non-dev server is logged since it indicates a cloud
    /// orchestrator hitting a dev-mode app.
    pub fn verify(
        &self,
        body: &[u8],
        signature: Option<&str>,
        server_kind: Option<&str>,
    ) -> Result<(), SignatureError> {
        if self.mode == Mode::Dev {
            if server_kind != Some("dev") {
                log::warn!(
                    "skipping signature verification in dev mode for a request from server kind {:?}",
                    server_kind.unwrap_or("unknown")
                );
            }
            return Ok(());
        }

        let signing_key = self.signing_key.as_deref().ok_or(SignatureError::MissingKey)?;
        let signature = signature.ok_or(SignatureError::MissingSignature)?;

        let (ts, mac_hex) =
            parse_signature(signature).ok_or(SignatureError::InvalidSignature)?;
        if (self.clock.unix_seconds() - ts).abs() > TIMESTAMP_WINDOW_SECS {
            return Err(SignatureError::InvalidSignature);
        }

        let provided: Vec<u8> =
            hex::decode(mac_hex).map_err(|_| SignatureError::InvalidSignature)?;
        let canonical = canonicalize(body);

        let mut keys = vec![signing_key];
        keys.extend(self.signing_key_fallback.as_deref());

        for key in keys {
            let expected = compute_mac(key, &canonical, ts);
            if bool::from(expected.ct_eq(provided.as_slice())) {
                return Ok(());
            }
        }

        Err(SignatureError::InvalidSignature)
    }

    /// Sign a body with the primary signing key, producing a
    /// `t=<now>&s=<mac>` header value.
    pub fn sign(&self, body: &[u8]) -> Result<String, SignatureError> {
        let key = self.signing_key.as_deref().ok_or(SignatureError::MissingKey)?;
        Ok(sign_with_key(key, body, self.clock.unix_seconds()))
    }
}

/// Sign `body` with `key` at the given timestamp.
pub fn sign_with_key(key: &str, body: &[u8], unix_seconds: i64) -> String {
    let mac = compute_mac(key, &canonicalize(body), unix_seconds);
    format!("t={unix_seconds}&s={}", hex::encode(mac))
}

fn compute_mac(key: &str, canonical_body: &[u8], ts: i64) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(macing_key(key).as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(canonical_body);
    mac.update(ts.to_string().as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn parse_signature(value: &str) -> Option<(i64, &str)> {
    let mut ts = None;
    let mut mac = None;
    for pair in value.split('&') {
        match pair.split_once('=')? {
            ("t", v) => ts = Some(v.parse::<i64>().ok()?),
            ("s", v) => mac = Some(v),
            _ => return None,
        }
    }
    Some((ts?, mac?))
}

/// Split a signing key into its `signkey-<env>-` prefix and key material.
/// Unprefixed keys are used whole.
fn split_key(key: &str) -> (&str, &str) {
    let Some(rest) = key.strip_prefix(SIGNING_KEY_PREFIX) else {
        return ("", key);
    };
    match rest.split_once('-') {
        Some((_env, material)) => key.split_at(key.len() - material.len()),
        None => ("", key),
    }
}

fn macing_key(key: &str) -> &str {
    split_key(key).1
}

/// Bearer token for outbound administrative calls: the hex key material is
/// decoded, SHA-256 hashed, re-encoded, and the prefix preserved.
pub fn hashed_signing_key(key: &str) -> Result<String, SignatureError> {
    let (prefix, material) = split_key(key);
    let decoded =
        hex::decode(material).map_err(|e| SignatureError::MalformedKey(e.to_string()))?;
    Ok(format!("{prefix}{}", sha256_hex(&decoded)))
}

/// Hex-encoded `sha256(data)`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "signkey-test-f00df00df00df00df00df00df00df00d";
    const FALLBACK: &str = "signkey-test-badcafebadcafebadcafebadcafe00ff";

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn unix_seconds(&self) -> i64 {
            self.0
        }
    }

    fn cloud_verifier(now: i64) -> SignatureVerifier {
        SignatureVerifier::new(Mode::Cloud, Some(KEY.into()), None).with_clock(FixedClock(now))
    }

    #[test]
    fn sign_verify_round_trip() {
        let body = br#"{"foo":"bar","baz":123}"#;
        let verifier = cloud_verifier(1_700_000_000);
        let header = verifier.sign(body).unwrap();
        assert!(verifier.verify(body, Some(&header), None).is_ok());
    }

    #[test]
    fn reformatted_body_verifies_against_same_signature() {
        let signed = br#"{"foo":"bar","baz":123}"#;
        let reformatted = b"{ \"baz\" : 123 , \"foo\" : \"bar\" }";

        let verifier = cloud_verifier(1_700_000_000);
        let header = verifier.sign(signed).unwrap();
        assert!(verifier.verify(reformatted, Some(&header), None).is_ok());
        assert_eq!(
            sign_with_key(KEY, signed, 42),
            sign_with_key(KEY, reformatted, 42)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected_even_with_valid_mac() {
        let body = b"{}";
        let header = sign_with_key(KEY, body, 1_700_000_000);

        let verifier = cloud_verifier(1_700_000_000 + TIMESTAMP_WINDOW_SECS + 1);
        assert_eq!(
            verifier.verify(body, Some(&header), None),
            Err(SignatureError::InvalidSignature)
        );

        let verifier = cloud_verifier(1_700_000_000 + TIMESTAMP_WINDOW_SECS);
        assert!(verifier.verify(body, Some(&header), None).is_ok());
    }

    #[test]
    fn fallback_key_is_accepted_when_primary_does_not_match() {
        let body = b"{}";
        let header = sign_with_key(FALLBACK, body, 1_700_000_000);

        let verifier =
            SignatureVerifier::new(Mode::Cloud, Some(KEY.into()), Some(FALLBACK.into()))
                .with_clock(FixedClock(1_700_000_000));
        assert!(verifier.verify(body, Some(&header), None).is_ok());

        let no_fallback = cloud_verifier(1_700_000_000);
        assert_eq!(
            no_fallback.verify(body, Some(&header), None),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn missing_key_and_missing_signature_are_distinct() {
        let verifier =
            SignatureVerifier::new(Mode::Cloud, None, None).with_clock(FixedClock(0));
        assert_eq!(
            verifier.verify(b"{}", Some("t=0&s=00"), None),
            Err(SignatureError::MissingKey)
        );

        let verifier = cloud_verifier(0);
        assert_eq!(
            verifier.verify(b"{}", None, None),
            Err(SignatureError::MissingSignature)
        );
    }

    #[test]
    fn malformed_header_is_invalid() {
        let verifier = cloud_verifier(0);
        for header in ["", "t=abc&s=00", "s=00", "t=1", "t=1&s=zz", "x=1&t=1&s=00"] {
            assert_eq!(
                verifier.verify(b"{}", Some(header), None),
                Err(SignatureError::InvalidSignature),
                "{header:?}"
            );
        }
    }

    #[test]
    fn dev_mode_always_verifies() {
        let verifier = SignatureVerifier::new(Mode::Dev, None, None);
        assert!(verifier.verify(b"{}", None, Some("dev")).is_ok());
        assert!(verifier.verify(b"{}", Some("garbage"), Some("cloud")).is_ok());
        assert!(verifier.verify(b"{}", None, None).is_ok());
    }

    #[test]
    fn hashed_signing_key_preserves_prefix() {
        let hashed = hashed_signing_key("signkey-test-00112233").unwrap();
        let expected = sha256_hex(&[0x00, 0x11, 0x22, 0x33]);
        assert_eq!(hashed, format!("signkey-test-{expected}"));

        let bare = hashed_signing_key("00112233").unwrap();
        assert_eq!(bare, expected);

        assert!(matches!(
            hashed_signing_key("signkey-test-zz"),
            Err(SignatureError::MalformedKey(_))
        ));
    }

    #[test]
    fn macing_key_strips_prefix_only_when_well_formed() {
        assert_eq!(macing_key("signkey-prod-aabb"), "aabb");
        assert_eq!(macing_key("aabb"), "aabb");
        assert_eq!(macing_key("signkey-aabb"), "signkey-aabb");
    }
}
