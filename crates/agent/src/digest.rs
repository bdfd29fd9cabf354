use crate::types::Digests;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute md5/sha1/sha256 of a local file in one pass. Blocking; callers
/// on the async side go through `tokio::task::spawn_blocking`.
pub fn hash_file(path: &Path) -> std::io::Result<Digests> {
    let mut fd = std::fs::File::open(path)?;

    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();

    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = fd.read(&mut buf)?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        sha1.update(&buf[..n]);
        sha256.update(&buf[..n]);
    }

    Ok(Digests {
        md5: hex::encode(md5.finalize()),
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
    })
}
