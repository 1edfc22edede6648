//! Content fingerprints for migration bodies.
//!
//! A checksum is the SHA-256 of the raw SQL bytes, hex encoded. Nothing is
//! normalised first: a whitespace-only edit to a repeatable migration is a
//! change and causes it to run again.

use sha2::{Digest, Sha256};

/// Length in characters of every value returned by [`compute_checksum`].
pub const CHECKSUM_LEN: usize = 64;

/// Compute the checksum of a migration's SQL body.
pub fn compute_checksum(sql_body: &str) -> String {
  let hash = Sha256::digest(sql_body.as_bytes());
  hex::encode(hash)
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::*;

  #[test]
  fn same_body_same_checksum() {
    let sql = "CREATE TABLE a (id INTEGER PRIMARY KEY);";
    assert_eq!(compute_checksum(sql), compute_checksum(sql));
  }

  #[test]
  fn checksum_is_lowercase_hex_of_fixed_length() {
    let sum = compute_checksum("SELECT 1;");
    assert_eq!(sum.len(), CHECKSUM_LEN);
    assert!(sum.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
  }

  #[test]
  fn known_vector() {
    // sha256("")
    assert_eq!(
      compute_checksum(""),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }

  #[test]
  fn whitespace_changes_checksum() {
    assert_ne!(
      compute_checksum("CREATE VIEW v AS SELECT 1;"),
      compute_checksum("CREATE VIEW v AS SELECT 1; ")
    );
  }

  #[test]
  fn distinct_bodies_do_not_collide() {
    let sums: HashSet<String> = (0..2000)
      .map(|i| compute_checksum(&format!("CREATE TABLE t{i} (id INTEGER);")))
      .collect();
    assert_eq!(sums.len(), 2000);
  }
}
