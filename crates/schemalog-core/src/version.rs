//! Natural ordering of version tokens.
//!
//! Versions are compared segment by segment, where a segment is a run of
//! ASCII digits or a run of anything else. Digit runs compare as numbers, so
//! `"2" < "10"` and `"1.2" < "1.10"`. Ties fall back to plain string order so
//! the ordering stays total (`"01"` and `"1"` are distinct).

use std::{cmp::Ordering, collections::BTreeSet};

fn segments(v: &str) -> impl Iterator<Item = &str> {
  let mut rest = v;
  std::iter::from_fn(move || {
    let first = rest.chars().next()?;
    let digit = first.is_ascii_digit();
    let end = rest
      .find(|c: char| c.is_ascii_digit() != digit)
      .unwrap_or(rest.len());
    let (seg, tail) = rest.split_at(end);
    rest = tail;
    Some(seg)
  })
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
  let a = a.trim_start_matches('0');
  let b = b.trim_start_matches('0');
  a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
  let mut left = segments(a);
  let mut right = segments(b);
  loop {
    let ord = match (left.next(), right.next()) {
      (None, None) => return a.cmp(b),
      (None, Some(_)) => return Ordering::Less,
      (Some(_), None) => return Ordering::Greater,
      (Some(x), Some(y)) => {
        let x_num = x.starts_with(|c: char| c.is_ascii_digit());
        let y_num = y.starts_with(|c: char| c.is_ascii_digit());
        match (x_num, y_num) {
          (true, true) => compare_numeric(x, y),
          _ => x.cmp(y),
        }
      }
    };
    if ord != Ordering::Equal {
      return ord;
    }
  }
}

/// Sort versions in place by [`compare_versions`].
pub fn sort_versions<S: AsRef<str>>(versions: &mut [S]) {
  versions.sort_by(|a, b| compare_versions(a.as_ref(), b.as_ref()));
}

/// The candidates that are not in `applied`, deduplicated and in natural
/// order.
pub fn pending_versions<'a, I, A>(candidates: I, applied: A) -> Vec<String>
where
  I: IntoIterator<Item = &'a str>,
  A: IntoIterator<Item = &'a str>,
{
  let applied: BTreeSet<&str> = applied.into_iter().collect();
  let mut pending: Vec<String> = candidates
    .into_iter()
    .filter(|v| !applied.contains(v))
    .collect::<BTreeSet<_>>()
    .into_iter()
    .map(str::to_owned)
    .collect();
  sort_versions(&mut pending);
  pending
}
