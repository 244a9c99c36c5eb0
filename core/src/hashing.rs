use sha2::{Digest, Sha256};

/// Separator placed between argument tokens before hashing (ASCII unit
/// separator). Part of the hash contract: changing it changes every hash.
pub const ARG_SEPARATOR: u8 = 0x1f;

/// Stable identity of a command: SHA-256 hex digest of the argument
/// tokens joined by [`ARG_SEPARATOR`].
pub fn hash_command<S: AsRef<str>>(argv: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, token) in argv.iter().enumerate() {
        if i > 0 {
            hasher.update([ARG_SEPARATOR]);
        }
        hasher.update(token.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_argv_hash_identically() {
        let a = hash_command(&["cargo", "test", "--workspace"]);
        let b = hash_command(&["cargo".to_string(), "test".to_string(), "--workspace".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn token_change_or_reorder_changes_hash() {
        let base = hash_command(&["git", "commit", "-m", "x"]);
        assert_ne!(base, hash_command(&["git", "commit", "-m", "y"]));
        assert_ne!(base, hash_command(&["git", "-m", "commit", "x"]));
    }

    #[test]
    fn token_boundaries_are_significant() {
        assert_ne!(hash_command(&["ab", "c"]), hash_command(&["a", "bc"]));
        assert_ne!(hash_command(&["abc"]), hash_command(&["ab", "c"]));
    }

    #[test]
    fn matches_joined_digest() {
        let mut hasher = Sha256::new();
        hasher.update(b"echo\x1fhello");
        assert_eq!(hash_command(&["echo", "hello"]), hex::encode(hasher.finalize()));
    }
}
