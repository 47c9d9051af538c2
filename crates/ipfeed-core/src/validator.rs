//! IPv4 candidate validation and deduplication
//!
//! Pure functions over strings. A candidate is accepted only if it is a
//! canonical dotted quad (four decimal octets, no leading zeros) outside the
//! private, loopback and reserved ranges:
//!
//! | Range            | Reason                  |
//! |------------------|-------------------------|
//! | `0.0.0.0/8`      | "this network"          |
//! | `10.0.0.0/8`     | private                 |
//! | `127.0.0.0/8`    | loopback                |
//! | `172.16.0.0/12`  | private                 |
//! | `192.168.0.0/16` | private                 |
//! | `224.0.0.0/3`    | multicast and reserved  |

use regex::Regex;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

/// Loose dotted-quad pattern; range checks happen in [`is_valid`]
static CANDIDATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("static IPv4 pattern compiles")
});

/// Parse a candidate into an address if it passes every check
pub fn parse_valid(candidate: &str) -> Option<Ipv4Addr> {
    let addr: Ipv4Addr = candidate.trim().parse().ok()?;
    if is_reserved(addr) { None } else { Some(addr) }
}

/// Whether `candidate` is a well-formed public IPv4 address
pub fn is_valid(candidate: &str) -> bool {
    parse_valid(candidate).is_some()
}

/// Whether `addr` falls in a range that is never reported
pub fn is_reserved(addr: Ipv4Addr) -> bool {
    let [a, b, _, _] = addr.octets();
    a == 0
        || a == 10
        || a == 127
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || a >= 224
}

/// Every dotted-quad looking substring of `text`, valid or not
pub fn candidates(text: &str) -> impl Iterator<Item = &str> {
    CANDIDATE_PATTERN.find_iter(text).map(|m| m.as_str())
}

/// Valid addresses found in `text`, unique, in first-seen order
pub fn extract_valid(text: &str) -> Vec<String> {
    dedupe(candidates(text).filter(|c| is_valid(c)).map(str::to_string))
}

/// Order-preserving deduplication; the first occurrence wins
pub fn dedupe<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
