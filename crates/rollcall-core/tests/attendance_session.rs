//! End-to-end: gallery build → session loop → report emission, with every
//! external collaborator replaced by an in-memory fake.

use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::detector::DetectorError;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::report::{ExportError, StoreError};
use rollcall_core::{
    AttendanceRecord, AttendanceStatus, AttendanceStore, BoundingBox, CancelFlag, CaptureSource,
    Clock, Embedding, FaceEncoder, FaceLocator, Frame, FrameProcessor, GalleryBuilder, LumaFrame,
    NearestThenGate, NullSink, PixelEncoding, ReportEmitter, ReportExport, ReportRow, RosterMember,
    SessionLoop, SessionTracker, DEFAULT_MATCH_THRESHOLD,
};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Reports one face whenever the image is not all black.
struct AnyBrightLocator;

impl FaceLocator for AnyBrightLocator {
    fn locate(&mut self, image: &LumaFrame) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.data.iter().all(|&p| p == 0) {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: image.width as f32,
            height: image.height as f32,
            confidence: 0.9,
            landmarks: None,
        }])
    }
}

/// The embedding is the mean brightness scaled into [0, 1].
struct MeanEncoder;

impl FaceEncoder for MeanEncoder {
    fn encode(&mut self, image: &LumaFrame, _: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let sum: u64 = image.data.iter().map(|&p| p as u64).sum();
        let mean = sum as f32 / image.data.len().max(1) as f32;
        Ok(Embedding::new(vec![mean / 255.0]))
    }
}

struct ManualClock {
    now: Cell<Instant>,
    step: Duration,
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let t = self.now.get();
        self.now.set(t + self.step);
        t
    }
}

/// Camera that only ever sees member A.
struct OnlyA {
    shade: u8,
    released: bool,
}

impl CaptureSource for OnlyA {
    fn acquire_frame(&mut self) -> Option<Frame> {
        Some(Frame::new(vec![self.shade; 32 * 32], 32, 32, PixelEncoding::Gray8))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[derive(Default)]
struct Ledger {
    rows: Vec<AttendanceRecord>,
}

impl AttendanceStore for Ledger {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.rows.push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Sheet {
    rows: Vec<ReportRow>,
}

impl ReportExport for Sheet {
    fn export(&mut self, rows: &[ReportRow]) -> Result<(), ExportError> {
        self.rows.extend_from_slice(rows);
        Ok(())
    }
}

fn write_portrait(dir: &Path, name: &str, shade: u8) -> PathBuf {
    let path = dir.join(name);
    image::GrayImage::from_pixel(32, 32, image::Luma([shade]))
        .save(&path)
        .unwrap();
    path
}

fn member(code: &str, image: Option<PathBuf>) -> RosterMember {
    RosterMember {
        code: code.to_string(),
        name: format!("Member {code}"),
        contact: format!("{}@school.test", code.to_lowercase()),
        reference_image: image,
    }
}

fn session_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 9, 1)
        .and_then(|d| d.and_hms_opt(8, 15, 0))
        .unwrap()
}

#[test]
fn only_observed_member_is_reported_present() {
    let dir = tempfile::tempdir().unwrap();
    // A and B have portraits far apart in brightness; C has none.
    let roster = vec![
        member("A", Some(write_portrait(dir.path(), "a.png", 200))),
        member("B", Some(write_portrait(dir.path(), "b.png", 60))),
        member("C", None),
    ];

    let build = GalleryBuilder::new().build(&roster, &mut AnyBrightLocator, &mut MeanEncoder);
    assert_eq!(build.gallery.len(), 2);
    assert_eq!(build.excluded.len(), 1);
    assert_eq!(build.excluded[0].code, "C");

    let start = Instant::now();
    let clock = ManualClock {
        now: Cell::new(start),
        step: Duration::from_millis(500),
    };
    let tracker = SessionTracker::start_at(
        roster.iter().map(|m| m.code.clone()),
        Duration::from_secs(10),
        start,
        session_start(),
    )
    .unwrap();
    let mut camera = OnlyA {
        shade: 200,
        released: false,
    };

    let finalized = SessionLoop {
        gallery: &build.gallery,
        matcher: &NearestThenGate,
        threshold: DEFAULT_MATCH_THRESHOLD,
        processor: FrameProcessor::default(),
        locator: &mut AnyBrightLocator,
        encoder: &mut MeanEncoder,
        clock: &clock,
        cancel: &CancelFlag::new(),
    }
    .run(tracker, &mut camera, &mut NullSink);

    assert!(camera.released);
    assert!(finalized.elapsed >= Duration::from_secs(10));
    assert_eq!(finalized.stats.cycles, 20);

    let mut ledger = Ledger::default();
    let mut sheet = Sheet::default();
    let outcome = ReportEmitter::new("Operating Systems").emit(&finalized, &roster, &mut ledger, &mut sheet);

    assert!(outcome.is_complete());
    let statuses: Vec<(&str, AttendanceStatus)> = ledger
        .rows
        .iter()
        .map(|r| (r.code.as_str(), r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("A", AttendanceStatus::Present),
            ("B", AttendanceStatus::Absent),
            ("C", AttendanceStatus::Absent),
        ]
    );
    assert!(ledger
        .rows
        .iter()
        .all(|r| r.date == session_start().date() && r.course == "Operating Systems"));
    assert_eq!(sheet.rows.len(), 3);
    assert_eq!(sheet.rows[0].full_name, "Member A");
}

#[test]
fn cancelled_session_still_reports_every_member() {
    let roster = vec![member("A", None), member("B", None)];
    let build = GalleryBuilder::new().build(&roster, &mut AnyBrightLocator, &mut MeanEncoder);
    assert!(build.gallery.is_empty());

    let start = Instant::now();
    let clock = ManualClock {
        now: Cell::new(start),
        step: Duration::from_millis(100),
    };
    let tracker =
        SessionTracker::start_at(["A", "B"], Duration::from_secs(10), start, session_start()).unwrap();
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut camera = OnlyA {
        shade: 200,
        released: false,
    };

    let finalized = SessionLoop {
        gallery: &build.gallery,
        matcher: &NearestThenGate,
        threshold: DEFAULT_MATCH_THRESHOLD,
        processor: FrameProcessor::default(),
        locator: &mut AnyBrightLocator,
        encoder: &mut MeanEncoder,
        clock: &clock,
        cancel: &cancel,
    }
    .run(tracker, &mut camera, &mut NullSink);

    assert!(finalized.was_cancelled());
    assert!(camera.released);

    let mut ledger = Ledger::default();
    let outcome = ReportEmitter::new("Databases").emit(&finalized, &roster, &mut ledger, &mut Sheet::default());
    assert_eq!(outcome.records.len(), 2);
    assert!(ledger.rows.iter().all(|r| r.status == AttendanceStatus::Absent));
}
