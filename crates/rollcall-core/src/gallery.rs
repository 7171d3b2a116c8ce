//! Reference gallery built once per session from roster imagery.
//!
//! A member whose reference image is missing, unreadable, or shows no face is
//! left out of the gallery. That is not an error, but such a member can never
//! be matched and will be reported absent until their image is fixed.

use crate::detector::FaceLocator;
use crate::frame::LumaFrame;
use crate::recognizer::FaceEncoder;
use crate::roster::RosterMember;
use crate::types::{BoundingBox, Embedding, GalleryEntry};
use serde::Serialize;
use std::collections::HashSet;

/// Identity code → reference embedding, plus the full roster code set.
///
/// Holds at most one entry per code, and only codes that are on the roster.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    roster: Vec<String>,
}

impl Gallery {
    /// Empty gallery over the given roster codes (duplicates collapse).
    pub fn with_roster<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let roster = codes
            .into_iter()
            .map(Into::into)
            .filter(|code: &String| seen.insert(code.clone()))
            .collect();
        Self {
            entries: Vec::new(),
            roster,
        }
    }

    /// Gallery whose roster is exactly the codes of `entries`.
    pub fn from_entries(entries: impl IntoIterator<Item = GalleryEntry>) -> Self {
        let entries: Vec<GalleryEntry> = entries.into_iter().collect();
        let mut gallery = Self::with_roster(entries.iter().map(|e| e.code.clone()));
        for entry in entries {
            gallery.insert(entry.code, entry.embedding);
        }
        gallery
    }

    /// Add a reference embedding. Returns `false` (and changes nothing) if the
    /// code is not on the roster or already has an entry.
    pub fn insert(&mut self, code: impl Into<String>, embedding: Embedding) -> bool {
        let code = code.into();
        if !self.roster.contains(&code) || self.contains(&code) {
            return false;
        }
        self.entries.push(GalleryEntry { code, embedding });
        true
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn roster_codes(&self) -> &[String] {
        &self.roster
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why a member has no gallery entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    NoReferenceImage,
    Missing(String),
    Unreadable(String),
    NoFaceDetected,
    InferenceFailed(String),
    DuplicateCode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub code: String,
    pub reason: ExclusionReason,
}

/// Result of a gallery build.
#[derive(Debug, Clone)]
pub struct GalleryBuild {
    pub gallery: Gallery,
    pub excluded: Vec<Exclusion>,
}

/// Chooses which located region in a reference image represents the member.
pub type RegionPolicy = fn(&[BoundingBox]) -> Option<&BoundingBox>;

/// Default reference-region policy: the first region the locator reports.
pub fn select_reference_region(regions: &[BoundingBox]) -> Option<&BoundingBox> {
    regions.first()
}

pub struct GalleryBuilder {
    policy: RegionPolicy,
}

impl Default for GalleryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GalleryBuilder {
    pub fn new() -> Self {
        Self {
            policy: select_reference_region,
        }
    }

    pub fn with_policy(policy: RegionPolicy) -> Self {
        Self { policy }
    }

    /// Build the gallery for `members`, in roster order.
    pub fn build(
        &self,
        members: &[RosterMember],
        locator: &mut dyn FaceLocator,
        encoder: &mut dyn FaceEncoder,
    ) -> GalleryBuild {
        let mut gallery = Gallery::with_roster(members.iter().map(|m| m.code.clone()));
        let mut excluded = Vec::new();
        let mut seen = HashSet::new();

        for member in members {
            let outcome = if seen.insert(member.code.as_str()) {
                self.reference_embedding(member, locator, encoder)
            } else {
                Err(ExclusionReason::DuplicateCode)
            };

            match outcome {
                Ok(embedding) => {
                    gallery.insert(member.code.clone(), embedding);
                }
                Err(reason) => {
                    tracing::warn!(
                        code = %member.code,
                        ?reason,
                        "member excluded from gallery; will be reported absent"
                    );
                    excluded.push(Exclusion {
                        code: member.code.clone(),
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            roster = gallery.roster_codes().len(),
            enrolled = gallery.len(),
            excluded = excluded.len(),
            "gallery built"
        );

        GalleryBuild { gallery, excluded }
    }

    fn reference_embedding(
        &self,
        member: &RosterMember,
        locator: &mut dyn FaceLocator,
        encoder: &mut dyn FaceEncoder,
    ) -> Result<Embedding, ExclusionReason> {
        let path = member
            .reference_image
            .as_deref()
            .ok_or(ExclusionReason::NoReferenceImage)?;
        if !path.is_file() {
            return Err(ExclusionReason::Missing(path.display().to_string()));
        }

        let image = image::open(path)
            .map_err(|e| ExclusionReason::Unreadable(format!("{}: {e}", path.display())))?;
        let luma = LumaFrame::from_image(image.to_luma8());

        let regions = locator
            .locate(&luma)
            .map_err(|e| ExclusionReason::InferenceFailed(e.to_string()))?;
        if regions.len() > 1 {
            tracing::debug!(code = %member.code, faces = regions.len(), "several faces in reference image");
        }
        let region = (self.policy)(&regions).ok_or(ExclusionReason::NoFaceDetected)?;

        encoder
            .encode(&luma, region)
            .map_err(|e| ExclusionReason::InferenceFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::recognizer::RecognizerError;
    use std::path::{Path, PathBuf};

    /// Reports one face per distinct non-zero pixel value in the top row,
    /// in left-to-right order.
    struct RowLocator;

    impl FaceLocator for RowLocator {
        fn locate(&mut self, image: &LumaFrame) -> Result<Vec<BoundingBox>, DetectorError> {
            let mut values: Vec<u8> = Vec::new();
            for &p in &image.data[..image.width as usize] {
                if p != 0 && !values.contains(&p) {
                    values.push(p);
                }
            }
            Ok(values
                .into_iter()
                .map(|v| BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                    confidence: v as f32 / 255.0,
                    landmarks: Some([(v as f32, 0.0); 5]),
                })
                .collect())
        }
    }

    /// Embeds a face as the pixel value that produced it.
    struct ValueEncoder;

    impl FaceEncoder for ValueEncoder {
        fn encode(&mut self, _: &LumaFrame, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
            let landmarks = face.landmarks.ok_or(RecognizerError::NoLandmarks)?;
            Ok(Embedding::new(vec![landmarks[0].0]))
        }
    }

    fn write_png(dir: &Path, name: &str, top_row: &[u8]) -> PathBuf {
        let width = top_row.len() as u32;
        let mut img = image::GrayImage::new(width, 2);
        for (x, &v) in top_row.iter().enumerate() {
            img.put_pixel(x as u32, 0, image::Luma([v]));
        }
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn member(code: &str, image: Option<PathBuf>) -> RosterMember {
        RosterMember {
            code: code.into(),
            name: format!("Member {code}"),
            contact: format!("{code}@example.edu"),
            reference_image: image,
        }
    }

    #[test]
    fn test_build_includes_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(dir.path(), "a.png", &[10, 10]);
        let blank = write_png(dir.path(), "blank.png", &[0, 0]);
        let junk = dir.path().join("junk.png");
        std::fs::write(&junk, b"not an image").unwrap();

        let members = vec![
            member("A", Some(a)),
            member("B", None),
            member("C", Some(dir.path().join("missing.png"))),
            member("D", Some(blank)),
            member("E", Some(junk)),
        ];

        let build = GalleryBuilder::new().build(&members, &mut RowLocator, &mut ValueEncoder);

        assert_eq!(build.gallery.len(), 1);
        assert!(build.gallery.contains("A"));
        assert_eq!(build.gallery.entries()[0].embedding.values, vec![10.0]);
        assert_eq!(build.gallery.roster_codes(), &["A", "B", "C", "D", "E"]);

        let reasons: Vec<(&str, &ExclusionReason)> =
            build.excluded.iter().map(|e| (e.code.as_str(), &e.reason)).collect();
        assert_eq!(reasons[0], ("B", &ExclusionReason::NoReferenceImage));
        assert!(matches!(reasons[1], ("C", ExclusionReason::Missing(_))));
        assert_eq!(reasons[2], ("D", &ExclusionReason::NoFaceDetected));
        assert!(matches!(reasons[3], ("E", ExclusionReason::Unreadable(_))));
    }

    #[test]
    fn test_first_region_is_reference_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let two_faces = write_png(dir.path(), "two.png", &[30, 200]);
        let members = vec![member("A", Some(two_faces))];

        let build = GalleryBuilder::new().build(&members, &mut RowLocator, &mut ValueEncoder);
        assert_eq!(build.gallery.entries()[0].embedding.values, vec![30.0]);
    }

    #[test]
    fn test_policy_is_replaceable() {
        fn last(regions: &[BoundingBox]) -> Option<&BoundingBox> {
            regions.last()
        }
        let dir = tempfile::tempdir().unwrap();
        let two_faces = write_png(dir.path(), "two.png", &[30, 200]);
        let members = vec![member("A", Some(two_faces))];

        let build = GalleryBuilder::with_policy(last).build(&members, &mut RowLocator, &mut ValueEncoder);
        assert_eq!(build.gallery.entries()[0].embedding.values, vec![200.0]);
    }

    #[test]
    fn test_duplicate_code_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_png(dir.path(), "first.png", &[40]);
        let second = write_png(dir.path(), "second.png", &[90]);
        let members = vec![member("A", Some(first)), member("A", Some(second))];

        let build = GalleryBuilder::new().build(&members, &mut RowLocator, &mut ValueEncoder);
        assert_eq!(build.gallery.len(), 1);
        assert_eq!(build.gallery.entries()[0].embedding.values, vec![40.0]);
        assert_eq!(build.gallery.roster_codes(), &["A"]);
        assert_eq!(build.excluded[0].reason, ExclusionReason::DuplicateCode);
    }

    #[test]
    fn test_insert_rejects_unknown_and_duplicate() {
        let mut gallery = Gallery::with_roster(["A"]);
        assert!(gallery.insert("A", Embedding::new(vec![1.0])));
        assert!(!gallery.insert("A", Embedding::new(vec![2.0])));
        assert!(!gallery.insert("Z", Embedding::new(vec![3.0])));
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_exclusion_serializes_with_reason_tag() {
        let e = Exclusion { code: "B".into(), reason: ExclusionReason::NoFaceDetected };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["code"], "B");
        assert_eq!(json["reason"], "no_face_detected");
    }
}
