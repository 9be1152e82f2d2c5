// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structural identity hashes for span operations.
//!
//! Two invocations of the same operation on the same application instance
//! always sign to the same hash. The loop reducer compares these hashes to
//! detect repeated subtrees.
//!
//! # Hashing Algorithm
//!
//! 1. Normalize package/class/method separators in the operation name to `;`
//! 2. Join landscape token, host, instance and operation name with `;`
//! 3. Digest the UTF-8 bytes (SHA3-256 by default)
//! 4. Render the digest as lowercase hex

use std::fmt;
use std::str::FromStr;

use sha2::Sha256;
use sha3::{Digest, Sha3_256};

use crate::errors::ConfigError;
use crate::span::Span;

/// Delimiter between the signed fields. Not part of the identifier alphabet.
pub const FIELD_DELIMITER: &str = ";";

// "::" must be replaced before "." is.
const OPERATION_SEPARATORS: [&str; 3] = ["::", ".", "#"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    #[default]
    Sha3_256,
    Sha256,
}

impl FromStr for DigestAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHA3-256" | "SHA3_256" => Ok(Self::Sha3_256),
            "SHA-256" | "SHA256" => Ok(Self::Sha256),
            _ => Err(ConfigError::UnsupportedDigest(s.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha3_256 => write!(f, "SHA3-256"),
            Self::Sha256 => write!(f, "SHA-256"),
        }
    }
}

/// Computes operation hashes. Stateless apart from the chosen digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashSigner {
    algorithm: DigestAlgorithm,
}

impl HashSigner {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Signs the operation identity of a span from its metadata fields.
    #[must_use]
    pub fn sign_span(&self, span: &Span) -> String {
        self.sign(
            &span.landscape_token,
            &span.host_ip_address,
            &span.app_instance_id,
            &span.fully_qualified_operation_name,
        )
    }

    #[must_use]
    pub fn sign(
        &self,
        landscape_token: &str,
        host_identity: &str,
        instance_identity: &str,
        operation_name: &str,
    ) -> String {
        let operation = normalize_operation_name(operation_name);
        let joined = [
            landscape_token,
            host_identity,
            instance_identity,
            operation.as_str(),
        ]
        .join(FIELD_DELIMITER);

        match self.algorithm {
            DigestAlgorithm::Sha3_256 => hex::encode(Sha3_256::digest(joined.as_bytes())),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(joined.as_bytes())),
        }
    }
}

fn normalize_operation_name(operation_name: &str) -> String {
    OPERATION_SEPARATORS
        .iter()
        .fold(operation_name.to_string(), |name, separator| {
            name.replace(separator, FIELD_DELIMITER)
        })
}
