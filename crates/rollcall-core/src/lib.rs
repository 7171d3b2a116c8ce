//! rollcall-core: Face matching and attendance sessions.
//!
//! Uses SCRFD for face localization and ArcFace for embeddings, both running
//! via ONNX Runtime on the CPU. The session loop, gallery and report
//! emission only see the collaborator traits defined here, so every piece
//! can be driven with fakes.

mod alignment;
pub mod capture;
pub mod detector;
pub mod driver;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod processor;
pub mod recognizer;
pub mod report;
pub mod roster;
pub mod session;
pub mod types;

use std::path::PathBuf;

pub use capture::{CancelFlag, CaptureSource, FaceLabel, NullSink, PresentationSink, SinkError};
pub use detector::{FaceDetector, FaceLocator};
pub use driver::SessionLoop;
pub use frame::{Frame, LumaFrame, PixelEncoding};
pub use gallery::{Gallery, GalleryBuild, GalleryBuilder};
pub use matcher::{match_face, MatchResult, Matcher, NearestThenGate, DEFAULT_MATCH_THRESHOLD};
pub use processor::{FrameProcessor, DEFAULT_DOWNSAMPLE};
pub use recognizer::{FaceEncoder, FaceRecognizer};
pub use report::{AttendanceStore, EmitOutcome, ReportEmitter, ReportExport, ReportRow};
pub use roster::{RosterMember, RosterSelector, RosterSource};
pub use session::{Clock, EndReason, FinalizedSession, SessionTracker, SystemClock};
pub use types::{AttendanceRecord, AttendanceStatus, BoundingBox, Embedding, FaceObservation};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Per-user data directory for rollcall.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
