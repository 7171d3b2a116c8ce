//! Matching an observed face against the reference gallery.
//!
//! The policy is nearest-then-gate: the single nearest gallery entry is
//! found first, and only that entry is tested against the tolerance. If the
//! nearest entry is out of tolerance the observation is unmatched, even when
//! some farther entry would have passed on its own.

use crate::gallery::Gallery;
use crate::types::{Embedding, GalleryEntry};

/// Default Euclidean tolerance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Code of the accepted gallery entry, if the nearest one passed the gate.
    pub code: Option<String>,
    /// Distance to the nearest entry (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Index of the nearest entry in gallery order.
    pub nearest: Option<usize>,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.code.is_some()
    }
}

/// Strategy for comparing a probe embedding against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Euclidean nearest-then-gate matcher.
///
/// Visits every gallery entry; ties on distance resolve to the earliest entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestThenGate;

impl Matcher for NearestThenGate {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        nearest_then_gate(probe, gallery, |_, distance| distance <= threshold)
    }
}

/// Find the nearest gallery entry, then accept it only if `within` holds for
/// that entry. `within` is never consulted for any other entry.
pub fn nearest_then_gate<F>(probe: &Embedding, gallery: &Gallery, within: F) -> MatchResult
where
    F: Fn(&GalleryEntry, f32) -> bool,
{
    let mut best_distance = f32::INFINITY;
    let mut best_idx: Option<usize> = None;

    for (i, entry) in gallery.entries().iter().enumerate() {
        let distance = probe.euclidean_distance(&entry.embedding);
        if best_idx.is_none() || distance < best_distance {
            best_distance = distance;
            best_idx = Some(i);
        }
    }

    let code = best_idx
        .map(|idx| &gallery.entries()[idx])
        .filter(|entry| within(entry, best_distance))
        .map(|entry| entry.code.clone());

    MatchResult {
        code,
        distance: best_distance,
        nearest: best_idx,
    }
}

/// Match one observed embedding; `Some(code)` only when the nearest gallery
/// entry lies within `threshold`.
pub fn match_face(probe: &Embedding, gallery: &Gallery, threshold: f32) -> Option<String> {
    NearestThenGate.compare(probe, gallery, threshold).code
}
