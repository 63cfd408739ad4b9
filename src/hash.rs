// src/hash.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//

//! Content digests computed while the engine streams the primary bytes.
//!
//! CRC-32 is always computed; it doubles as the part ETag of the local
//! backends. Any of the cryptographic digests can be requested on top.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::descriptor::HashInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Crc32,
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Crc32 => "crc32",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "crc32" => Ok(HashAlgorithm::Crc32),
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(format!("unknown hash algorithm `{other}`")),
        }
    }
}

#[derive(Clone)]
enum Digester {
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl Digester {
    fn update(&mut self, data: &[u8]) {
        match self {
            Digester::Md5(ctx) => ctx.consume(data),
            Digester::Sha1(h) => h.update(data),
            Digester::Sha256(h) => h.update(data),
            Digester::Sha384(h) => h.update(data),
            Digester::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Digester::Md5(ctx) => format!("{:x}", ctx.compute()),
            Digester::Sha1(h) => hex::encode(h.finalize()),
            Digester::Sha256(h) => hex::encode(h.finalize()),
            Digester::Sha384(h) => hex::encode(h.finalize()),
            Digester::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Incremental hasher for one object.
#[derive(Clone)]
pub struct ContentHasher {
    crc32: crc32fast::Hasher,
    digests: Vec<(HashAlgorithm, Digester)>,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithms: Vec<HashAlgorithm> = self.digests.iter().map(|(a, _)| *a).collect();
        f.debug_struct("ContentHasher").field("digests", &algorithms).finish()
    }
}

impl ContentHasher {
    /// Hasher computing CRC-32 plus every algorithm in `algorithms`.
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        let mut digests: Vec<(HashAlgorithm, Digester)> = Vec::new();
        for &algorithm in algorithms {
            if digests.iter().any(|(a, _)| *a == algorithm) {
                continue;
            }
            let digester = match algorithm {
                HashAlgorithm::Crc32 => continue,
                HashAlgorithm::Md5 => Digester::Md5(md5::Context::new()),
                HashAlgorithm::Sha1 => Digester::Sha1(sha1::Sha1::new()),
                HashAlgorithm::Sha256 => Digester::Sha256(sha2::Sha256::new()),
                HashAlgorithm::Sha384 => Digester::Sha384(sha2::Sha384::new()),
                HashAlgorithm::Sha512 => Digester::Sha512(sha2::Sha512::new()),
            };
            digests.push((algorithm, digester));
        }
        Self {
            crc32: crc32fast::Hasher::new(),
            digests,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.crc32.update(data);
        for (_, digester) in &mut self.digests {
            digester.update(data);
        }
    }

    pub fn finish(self) -> HashInfo {
        let mut info = HashInfo::from_crc32(self.crc32.finalize());
        for (algorithm, digester) in self.digests {
            info.digests.insert(algorithm, digester.finish());
        }
        info
    }

    /// The digests of everything seen so far, leaving `self` usable.
    pub fn snapshot(&self) -> HashInfo {
        self.clone().finish()
    }
}
