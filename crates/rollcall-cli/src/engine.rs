use crate::config::Config;
use crate::snapshot::SnapshotSink;
use rollcall_core::capture::{CancelFlag, NullSink, PresentationSink};
use rollcall_core::detector::DetectorError;
use rollcall_core::gallery::{GalleryBuild, GalleryBuilder};
use rollcall_core::processor::{FrameProcessor, ProcessError};
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::roster::RosterMember;
use rollcall_core::session::{SessionError, SystemClock};
use rollcall_core::{FaceDetector, FaceRecognizer, FinalizedSession, NearestThenGate, SessionLoop, SessionTracker};
use rollcall_hw::{Camera, CameraError};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("frame processor: {0}")]
    Processor(#[from] ProcessError),
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("failed to spawn session thread: {0}")]
    Spawn(std::io::Error),
    #[error("session thread exited without a result")]
    ChannelClosed,
}

/// Both ONNX models, loaded once and moved onto the session thread.
pub struct Models {
    pub detector: FaceDetector,
    pub recognizer: FaceRecognizer,
}

impl Models {
    pub fn load(config: &Config) -> Result<Self, EngineError> {
        Ok(Self {
            detector: FaceDetector::load(&config.detector_model_path())?,
            recognizer: FaceRecognizer::load(&config.recognizer_model_path())?,
        })
    }

    pub fn build_gallery(&mut self, roster: &[RosterMember]) -> GalleryBuild {
        GalleryBuilder::new().build(roster, &mut self.detector, &mut self.recognizer)
    }
}

/// Everything the session thread needs, owned.
pub struct SessionPlan {
    pub camera_device: String,
    pub warmup_frames: usize,
    pub frame_timeout: std::time::Duration,
    pub threshold: f32,
    pub processor: FrameProcessor,
    pub duration: std::time::Duration,
    pub build: GalleryBuild,
    pub sink: Box<dyn PresentationSink + Send>,
}

impl SessionPlan {
    pub fn new(config: &Config, build: GalleryBuild) -> Result<Self, EngineError> {
        let sink: Box<dyn PresentationSink + Send> = match &config.snapshot_path {
            Some(path) => Box::new(SnapshotSink::new(path.clone())),
            None => Box::new(NullSink),
        };

        Ok(Self {
            camera_device: config.camera_device.clone(),
            warmup_frames: config.warmup_frames,
            frame_timeout: config.frame_timeout(),
            threshold: config.match_threshold,
            processor: FrameProcessor::new(config.downsample)?,
            duration: config.session_duration(),
            build,
            sink,
        })
    }
}

/// Run one session on a dedicated OS thread and wait for it.
///
/// The camera is opened on that thread, after the models are already in
/// memory. Tripping `cancel` ends the session early with whatever split it
/// has accumulated.
pub async fn run_session(
    plan: SessionPlan,
    mut models: Models,
    cancel: CancelFlag,
) -> Result<FinalizedSession, EngineError> {
    let (reply_tx, reply_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            tracing::info!("session thread started");
            let result = session_thread(plan, &mut models, &cancel);
            let _ = reply_tx.send(result);
            tracing::info!("session thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
}

fn session_thread(
    plan: SessionPlan,
    models: &mut Models,
    cancel: &CancelFlag,
) -> Result<FinalizedSession, EngineError> {
    let SessionPlan {
        camera_device,
        warmup_frames,
        frame_timeout,
        threshold,
        processor,
        duration,
        build,
        mut sink,
    } = plan;

    let camera = Camera::open(&camera_device)?;
    tracing::info!(
        device = %camera_device,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format(),
        "camera opened"
    );
    let mut stream = camera.stream(warmup_frames, frame_timeout)?;

    let clock = SystemClock;
    let tracker = SessionTracker::start(
        build.gallery.roster_codes().iter().cloned(),
        duration,
        &clock,
    )?;

    let finalized = SessionLoop {
        gallery: &build.gallery,
        matcher: &NearestThenGate,
        threshold,
        processor,
        locator: &mut models.detector,
        encoder: &mut models.recognizer,
        clock: &clock,
        cancel,
    }
    .run(tracker, &mut stream, sink.as_mut());

    Ok(finalized)
}
