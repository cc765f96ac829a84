use sha2::{Digest, Sha256};
use std::fmt;

use crate::fetch::ApiRequest;

/// Cache key for a request. Built from the method, the encoded target and
/// the serialized body, so two fingerprints match exactly when the requests
/// would be byte-identical.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(req: &ApiRequest) -> Self {
        let mut key = format!("{} {}", req.method.as_str(), req.target());
        if let Some(body) = req.body_text() {
            key.push('\n');
            key.push_str(&body);
        }
        Fingerprint(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short stable digest for log lines.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(&hash[..8])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
