use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use digest::DynDigest;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use super::ast::{Digest, DigestAlgorithm};

fn hasher(algorithm: DigestAlgorithm) -> Box<dyn DynDigest> {
    match algorithm {
        DigestAlgorithm::Sha224 => Box::<Sha224>::default(),
        DigestAlgorithm::Sha256 => Box::<Sha256>::default(),
        DigestAlgorithm::Sha384 => Box::<Sha384>::default(),
        DigestAlgorithm::Sha512 => Box::<Sha512>::default(),
    }
}

/// Compute the digest of a file's contents.
pub fn compute(algorithm: DigestAlgorithm, path: &Path) -> io::Result<Box<[u8]>> {
    let mut file = File::open(path)?;
    let mut hasher = hasher(algorithm);

    let mut buf = [0u8; 8192];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(hasher.finalize())
}

/// Does the file at `path` match any of the listed digests? A file that cannot be read never
/// matches.
pub(super) fn file_matches(path: &Path, digests: &[Digest]) -> bool {
    digests.iter().any(|digest| {
        let Some(expected) = digest.decode() else {
            return false;
        };
        match compute(digest.algorithm, path) {
            Ok(actual) => *actual == *expected,
            Err(_) => false,
        }
    })
}
