//! SHA-256 content hashing rendered as lowercase hex

use sha2::{Digest, Sha256};

/// Hash of exact content bytes. Chunk identity depends on nothing else.
pub fn hash_content(bytes: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(bytes.as_ref()))
}

/// File-level leaf hash over `relative_path || 0x00 || bytes`. Binding the path
/// in means identical files at different locations get different leaves.
pub fn hash_file(relative_path: &str, bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(bytes.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Internal node hash over the two child hex strings
pub fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_hash_content_known_vector() {
        let actual = hash_content("abc");
        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_file_hash_binds_path() {
        let content = "fn add(a: i32, b: i32) -> i32 { a + b }";

        let left = hash_file("src/a.rs", content);
        let right = hash_file("src/b.rs", content);

        assert_ne!(left, right);
        assert_eq!(hash_content(content), hash_content(content));
    }

    #[test]
    fn test_file_hash_separator_prevents_ambiguity() {
        assert_ne!(hash_file("ab", "c"), hash_file("a", "bc"));
    }

    #[test]
    fn test_hash_pair_is_ordered() {
        let a = hash_content("a");
        let b = hash_content("b");
        assert_ne!(hash_pair(&a, &b), hash_pair(&b, &a));
        assert_eq!(hash_pair(&a, &b).len(), 64);
    }
}
