use anyhow::{anyhow, bail, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Checks an `X-Hub-Signature-256` value (`sha256=<hex>`) against `payload`.
pub fn verify_github_sha256_signature(payload: &[u8], signature: &str, secret: &str) -> Result<()> {
    let Some(digest_hex) = signature.strip_prefix("sha256=") else {
        bail!("github webhook signature must use sha256=<hex> format");
    };
    let signature_bytes = decode_hex(digest_hex)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("failed to initialize webhook HMAC verifier")?;
    mac.update(payload);
    mac.verify_slice(&signature_bytes)
        .map_err(|_| anyhow!("webhook signature verification failed"))
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("signature digest cannot be empty");
    }
    if trimmed.len() % 2 != 0 {
        bail!("signature digest must have an even number of hex characters");
    }

    let raw = trimmed.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len() / 2);
    for pair in raw.chunks(2) {
        let hex = std::str::from_utf8(pair).context("invalid utf-8 in digest")?;
        let byte = u8::from_str_radix(hex, 16)
            .with_context(|| format!("invalid hex byte '{hex}' in signature digest"))?;
        bytes.push(byte);
    }
    Ok(bytes)
}

#[cfg(test)]
pub(crate) fn sign_for_tests(payload: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("sha256={hex}")
}

#[cfg(test)]
mod tests {
    use super::{decode_hex, sign_for_tests, verify_github_sha256_signature};

    #[test]
    fn unit_valid_signature_is_accepted() {
        let payload = br#"{"action":"assigned"}"#;
        let signature = sign_for_tests(payload, "topsecret");
        assert!(verify_github_sha256_signature(payload, &signature, "topsecret").is_ok());
    }

    #[test]
    fn unit_wrong_secret_or_tampered_payload_is_rejected() {
        let payload = br#"{"action":"assigned"}"#;
        let signature = sign_for_tests(payload, "topsecret");
        assert!(verify_github_sha256_signature(payload, &signature, "other").is_err());
        assert!(
            verify_github_sha256_signature(br#"{"action":"closed"}"#, &signature, "topsecret")
                .is_err()
        );
    }

    #[test]
    fn regression_malformed_signatures_fail_cleanly() {
        let error = verify_github_sha256_signature(b"{}", "sha1=abcd", "secret")
            .expect_err("wrong scheme");
        assert!(error.to_string().contains("sha256=<hex>"));
        assert!(verify_github_sha256_signature(b"{}", "sha256=", "secret").is_err());
        assert!(verify_github_sha256_signature(b"{}", "sha256=abc", "secret").is_err());
        assert!(decode_hex("zz").is_err());
        assert_eq!(decode_hex("00ff10").expect("decode"), vec![0x00, 0xff, 0x10]);
    }
}
