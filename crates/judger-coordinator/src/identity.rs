// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coordinator identity used as the lease owner token.

use rand::Rng;
use rand::distributions::Alphanumeric;

const SUFFIX_LEN: usize = 6;

/// Generate `<hostname>-<6 random alphanumerics>`, or just the suffix when
/// the hostname cannot be read.
pub fn generate() -> String {
    let hostname = nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok());
    compose(hostname.as_deref(), &random_suffix())
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

fn compose(hostname: Option<&str>, suffix: &str) -> String {
    match hostname {
        Some(host) if !host.is_empty() => format!("{}-{}", host, suffix),
        _ => suffix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose() {
        assert_eq!(compose(Some("node-1"), "abc123"), "node-1-abc123");
        assert_eq!(compose(None, "abc123"), "abc123");
        assert_eq!(compose(Some(""), "abc123"), "abc123");
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        let suffix = a.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
