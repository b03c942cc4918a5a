//! Duplicate and adoption resolution
//!
//! When a create call reports that an equivalent entity already exists, the
//! sync engine lists the collection and asks this module which existing entity
//! the record should bind to. Resolution is a pure function over an explicit
//! listing snapshot, so records racing to create the same entity each reach
//! the same answer without any shared state.
//!
//! Matching requires convergent evidence:
//! 1. URL match (trailing-slash and whitespace insensitive) plus a name match
//!    whenever the entity carries a name.
//! 2. Failing that, an exact name match that is unique across the listing.
//!
//! A URL alone, without a desired name, is never enough, and ambiguity is
//! never resolved by picking one candidate.
//!
//! Only entities of the desired type are candidates. An entity that would
//! match on everything but its type is reported as a type mismatch rather than
//! adopted.

use crate::client::ExternalEntity;

/// Outcome of a duplicate resolution
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    Matched(&'a ExternalEntity),
    /// Nothing in the listing matches
    NoCandidate,
    /// More than one entity matches equally well
    Ambiguous(usize),
    /// The only match has a different type than desired
    TypeMismatch(&'a ExternalEntity),
}

impl<'a> Resolution<'a> {
    pub fn matched(self) -> Option<&'a ExternalEntity> {
        match self {
            Resolution::Matched(entity) => Some(entity),
            Resolution::NoCandidate | Resolution::Ambiguous(_) | Resolution::TypeMismatch(_) => None,
        }
    }
}

/// Normalize an address for comparison
pub fn normalize_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

fn unique<'a>(mut candidates: Vec<&'a ExternalEntity>) -> Resolution<'a> {
    match candidates.len() {
        0 => Resolution::NoCandidate,
        1 => Resolution::Matched(candidates.remove(0)),
        n => Resolution::Ambiguous(n),
    }
}

/// Find the existing entity a desired `(type, url, name)` triple should adopt
pub fn resolve_duplicate<'a>(
    entities: &'a [ExternalEntity],
    desired_type: &str,
    desired_url: Option<&str>,
    desired_name: &str,
) -> Resolution<'a> {
    let (same_type, other_type): (Vec<&ExternalEntity>, Vec<&ExternalEntity>) = entities
        .iter()
        .partition(|e| e.entity_type.trim().eq_ignore_ascii_case(desired_type.trim()));

    match resolve_among(&same_type, desired_url, desired_name) {
        Resolution::NoCandidate => match resolve_among(&other_type, desired_url, desired_name) {
            Resolution::Matched(entity) => Resolution::TypeMismatch(entity),
            _ => Resolution::NoCandidate,
        },
        resolution => resolution,
    }
}

fn resolve_among<'a>(
    entities: &[&'a ExternalEntity],
    desired_url: Option<&str>,
    desired_name: &str,
) -> Resolution<'a> {
    let desired_name = desired_name.trim();
    if desired_name.is_empty() {
        return Resolution::NoCandidate;
    }

    let desired_url = desired_url
        .map(normalize_url)
        .filter(|url| !url.is_empty());

    if let Some(desired_url) = desired_url {
        let by_url: Vec<&ExternalEntity> = entities
            .iter()
            .copied()
            .filter(|e| {
                e.url
                    .as_deref()
                    .is_some_and(|url| normalize_url(url) == desired_url)
            })
            .filter(|e| {
                let name = e.name.trim();
                name.is_empty() || name == desired_name
            })
            .collect();

        if !by_url.is_empty() {
            return unique(by_url);
        }
    }

    let by_name: Vec<&ExternalEntity> = entities
        .iter()
        .copied()
        .filter(|e| e.name.trim() == desired_name)
        .collect();
    unique(by_name)
}
