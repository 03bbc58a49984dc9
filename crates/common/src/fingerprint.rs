//! Content fingerprinting for analysis-job idempotency
//!
//! A fingerprint is the sha256 of the resume text, job text, and the
//! embedding model version, joined with a separator so that boundary
//! shifts between the inputs cannot collide.

use sha2::{Digest, Sha256};

const FIELD_SEPARATOR: u8 = 0x1f;

/// Compute the idempotency fingerprint for an analysis submission.
pub fn job_fingerprint(resume_text: &str, job_text: &str, model_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resume_text.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(job_text.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(model_version.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stable() {
        let a = job_fingerprint("resume", "job", "v1");
        let b = job_fingerprint("resume", "job", "v1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_sensitive_to_inputs() {
        let base = job_fingerprint("resume", "job", "v1");
        assert_ne!(base, job_fingerprint("resume2", "job", "v1"));
        assert_ne!(base, job_fingerprint("resume", "job2", "v1"));
        assert_ne!(base, job_fingerprint("resume", "job", "v2"));
    }

    #[test]
    fn test_fingerprint_boundary_shift() {
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(
            job_fingerprint("ab", "c", "v1"),
            job_fingerprint("a", "bc", "v1")
        );
    }
}
