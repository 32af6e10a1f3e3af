//! Frame sources.
//!
//! A [`FrameSource`] yields canonical RGB frames from a file, a network
//! stream or memory. Live and file sources are decoded by the `ffmpeg` CLI
//! into raw RGB24 frames on stdout, scaled to the canonical resolution.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbImage;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{VisionError, VisionResult};
use crate::frame::{resize_to, Frame, FrameSize};

/// A sequence of frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Open the source. Failure is permanent for the camera using it.
    async fn open(&mut self) -> VisionResult<()>;

    /// Next frame, or `None` at end of stream.
    async fn read_frame(&mut self) -> VisionResult<Option<Frame>>;

    /// Restart from the first frame.
    async fn rewind(&mut self) -> VisionResult<()>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

#[async_trait]
impl FrameSource for Box<dyn FrameSource> {
    async fn open(&mut self) -> VisionResult<()> {
        (**self).open().await
    }

    async fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
        (**self).read_frame().await
    }

    async fn rewind(&mut self) -> VisionResult<()> {
        (**self).rewind().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Where an ffmpeg-decoded source reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    File(PathBuf),
    Stream(String),
}

impl SourceLocation {
    /// Anything with a URI scheme is a stream, everything else a local path.
    pub fn parse(uri: &str) -> Self {
        if uri.contains("://") {
            SourceLocation::Stream(uri.to_string())
        } else {
            SourceLocation::File(PathBuf::from(uri))
        }
    }

    fn is_rtsp(&self) -> bool {
        matches!(self, SourceLocation::Stream(uri) if uri.starts_with("rtsp://"))
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceLocation::File(path) => write!(f, "{}", path.display()),
            SourceLocation::Stream(uri) => write!(f, "{}", uri),
        }
    }
}

/// Running decoder process.
struct Decoder {
    child: Child,
    reader: BufReader<ChildStdout>,
}

/// File or stream source decoded by the ffmpeg CLI.
pub struct FfmpegSource {
    location: SourceLocation,
    size: FrameSize,
    decoder: Option<Decoder>,
    /// First frame read during `open`, returned by the next `read_frame`
    pending: Option<RgbImage>,
    sequence: u64,
}

impl FfmpegSource {
    pub fn new(uri: &str, size: FrameSize) -> Self {
        Self {
            location: SourceLocation::parse(uri),
            size,
            decoder: None,
            pending: None,
            sequence: 0,
        }
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if self.location.is_rtsp() {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        match &self.location {
            SourceLocation::File(path) => {
                cmd.arg("-i").arg(path);
            }
            SourceLocation::Stream(uri) => {
                cmd.arg("-i").arg(uri);
            }
        }
        cmd.args([
            "-vf",
            &format!("scale={}:{}", self.size.width, self.size.height),
            "-pix_fmt",
            "rgb24",
            "-f",
            "rawvideo",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
        cmd
    }

    fn spawn(&self) -> VisionResult<Decoder> {
        which::which("ffmpeg").map_err(|_| VisionError::FfmpegNotFound)?;

        if let SourceLocation::File(path) = &self.location {
            ensure_exists(path)?;
        }

        let mut child = self.command().spawn().map_err(|e| {
            VisionError::source_unavailable(format!("Failed to spawn FFmpeg: {}", e))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            VisionError::source_unavailable("Failed to capture FFmpeg stdout")
        })?;

        Ok(Decoder {
            child,
            reader: BufReader::new(stdout),
        })
    }

    /// Read one raw frame from the running decoder.
    async fn read_raw(&mut self) -> VisionResult<Option<RgbImage>> {
        let len = self.size.rgb_len();
        let size = self.size;
        let decoder = match self.decoder.as_mut() {
            Some(decoder) => decoder,
            None => return Err(VisionError::read_failed("Source is not open")),
        };

        let mut buffer = vec![0u8; len];
        match decoder.reader.read_exact(&mut buffer).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(VisionError::read_failed(e.to_string())),
        }

        RgbImage::from_raw(size.width, size.height, buffer)
            .map(Some)
            .ok_or_else(|| VisionError::InvalidFrame("Raw frame size mismatch".to_string()))
    }

    async fn stop_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            if let Err(e) = decoder.child.kill().await {
                debug!(source = %self.location, error = %e, "FFmpeg already exited");
            }
        }
    }

    async fn start_decoder(&mut self) -> VisionResult<()> {
        self.stop_decoder().await;
        self.pending = None;
        self.decoder = Some(self.spawn()?);

        match self.read_raw().await {
            Ok(Some(first)) => {
                self.pending = Some(first);
                Ok(())
            }
            Ok(None) => {
                self.stop_decoder().await;
                Err(VisionError::source_unavailable(format!(
                    "{} produced no frames",
                    self.location
                )))
            }
            Err(e) => {
                self.stop_decoder().await;
                Err(VisionError::source_unavailable(format!(
                    "{}: {}",
                    self.location, e
                )))
            }
        }
    }
}

fn ensure_exists(path: &Path) -> VisionResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(VisionError::source_unavailable(format!(
            "File not found: {}",
            path.display()
        )))
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn open(&mut self) -> VisionResult<()> {
        self.start_decoder().await?;
        info!(source = %self.location, width = self.size.width, height = self.size.height, "Opened FFmpeg source");
        Ok(())
    }

    async fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
        let image = match self.pending.take() {
            Some(image) => Some(image),
            None => self.read_raw().await?,
        };

        Ok(image.map(|image| {
            self.sequence += 1;
            Frame::canonical(self.sequence, image, self.size)
        }))
    }

    async fn rewind(&mut self) -> VisionResult<()> {
        debug!(source = %self.location, "Rewinding FFmpeg source");
        self.start_decoder().await
    }

    fn describe(&self) -> String {
        format!("ffmpeg:{}", self.location)
    }
}

/// A finite list of frames held in memory.
pub struct MemorySource {
    name: String,
    images: Vec<RgbImage>,
    size: FrameSize,
    position: usize,
    sequence: u64,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, images: Vec<RgbImage>, size: FrameSize) -> Self {
        Self {
            name: name.into(),
            images,
            size,
            position: 0,
            sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn open(&mut self) -> VisionResult<()> {
        if self.images.is_empty() {
            return Err(VisionError::source_unavailable(format!(
                "{} has no frames",
                self.name
            )));
        }
        self.position = 0;
        Ok(())
    }

    async fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
        let Some(image) = self.images.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        self.sequence += 1;
        Ok(Some(Frame::canonical(self.sequence, image.clone(), self.size)))
    }

    async fn rewind(&mut self) -> VisionResult<()> {
        self.position = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory:{} ({} frames)", self.name, self.images.len())
    }
}

/// Restarts the wrapped source whenever it runs out.
///
/// Frames are resized to the canonical size before being returned. An inner
/// source that is still empty right after a rewind yields
/// [`VisionError::EndOfStream`], which callers treat as recoverable. A failed
/// rewind is retried on the next call instead of reading from a source that
/// was left closed.
pub struct LoopingSource<S> {
    inner: S,
    size: FrameSize,
    sequence: u64,
    rewinds: u64,
    needs_rewind: bool,
}

impl<S: FrameSource> LoopingSource<S> {
    pub fn new(inner: S, size: FrameSize) -> Self {
        Self {
            inner,
            size,
            sequence: 0,
            rewinds: 0,
            needs_rewind: false,
        }
    }

    /// Number of successful rewinds so far.
    pub fn rewinds(&self) -> u64 {
        self.rewinds
    }

    async fn restart(&mut self) -> VisionResult<()> {
        if let Err(e) = self.inner.rewind().await {
            self.needs_rewind = true;
            return Err(e);
        }
        self.needs_rewind = false;
        self.rewinds += 1;
        Ok(())
    }

    /// Next frame, rewinding once on end of stream.
    pub async fn next_frame(&mut self) -> VisionResult<Frame> {
        if self.needs_rewind {
            self.restart().await?;
        }

        let frame = match self.inner.read_frame().await? {
            Some(frame) => frame,
            None => {
                self.restart().await?;
                match self.inner.read_frame().await? {
                    Some(frame) => frame,
                    None => {
                        warn!(source = %self.inner.describe(), "Source empty after rewind");
                        return Err(VisionError::end_of_stream(self.inner.describe()));
                    }
                }
            }
        };

        self.sequence += 1;
        let image = match std::sync::Arc::try_unwrap(frame.image) {
            Ok(image) => image,
            Err(shared) => (*shared).clone(),
        };
        Ok(Frame {
            sequence: self.sequence,
            image: std::sync::Arc::new(resize_to(image, self.size)),
        })
    }
}

#[async_trait]
impl<S: FrameSource> FrameSource for LoopingSource<S> {
    async fn open(&mut self) -> VisionResult<()> {
        self.inner.open().await
    }

    async fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
        self.next_frame().await.map(Some)
    }

    async fn rewind(&mut self) -> VisionResult<()> {
        self.restart().await
    }

    fn describe(&self) -> String {
        format!("loop({})", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CANONICAL_FRAME_SIZE;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb([value, value, value]))
    }

    #[test]
    fn test_location_parsing() {
        assert_eq!(
            SourceLocation::parse("rtsp://10.0.0.2/stream"),
            SourceLocation::Stream("rtsp://10.0.0.2/stream".to_string())
        );
        assert_eq!(
            SourceLocation::parse("videos/cam01.mp4"),
            SourceLocation::File(PathBuf::from("videos/cam01.mp4"))
        );
        assert!(SourceLocation::parse("rtsp://x").is_rtsp());
        assert!(!SourceLocation::parse("http://x").is_rtsp());
    }

    #[tokio::test]
    async fn test_memory_source_ends() {
        let mut source = MemorySource::new(
            "test",
            vec![solid(640, 360, 1), solid(640, 360, 2)],
            CANONICAL_FRAME_SIZE,
        );
        source.open().await.unwrap();
        assert!(source.read_frame().await.unwrap().is_some());
        assert!(source.read_frame().await.unwrap().is_some());
        assert!(source.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_memory_source_is_unavailable() {
        let mut source = MemorySource::new("empty", vec![], CANONICAL_FRAME_SIZE);
        let err = source.open().await.unwrap_err();
        assert!(err.is_source_fatal());
    }

    #[tokio::test]
    async fn test_looping_source_rewinds_and_resizes() {
        let inner = MemorySource::new(
            "loop",
            vec![solid(320, 240, 10), solid(320, 240, 20)],
            FrameSize::new(320, 240),
        );
        let mut source = LoopingSource::new(inner, CANONICAL_FRAME_SIZE);
        source.open().await.unwrap();

        let mut values = Vec::new();
        for _ in 0..5 {
            let frame = source.next_frame().await.unwrap();
            assert_eq!(frame.width(), 640);
            assert_eq!(frame.height(), 360);
            values.push(frame.image.get_pixel(0, 0).0[0]);
        }

        assert_eq!(values, vec![10, 20, 10, 20, 10]);
        assert_eq!(source.rewinds(), 2);
    }

    #[tokio::test]
    async fn test_looping_sequence_keeps_increasing() {
        let inner = MemorySource::new("seq", vec![solid(640, 360, 0)], CANONICAL_FRAME_SIZE);
        let mut source = LoopingSource::new(inner, CANONICAL_FRAME_SIZE);
        source.open().await.unwrap();

        let a = source.next_frame().await.unwrap();
        let b = source.next_frame().await.unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
    }

    /// Memory source whose first `failures` rewinds fail.
    struct FlakyRewind {
        inner: MemorySource,
        failures: u32,
        attempts: u32,
    }

    #[async_trait]
    impl FrameSource for FlakyRewind {
        async fn open(&mut self) -> VisionResult<()> {
            self.inner.open().await
        }

        async fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
            self.inner.read_frame().await
        }

        async fn rewind(&mut self) -> VisionResult<()> {
            self.attempts += 1;
            if self.attempts <= self.failures {
                return Err(VisionError::source_unavailable("reconnect failed"));
            }
            self.inner.rewind().await
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    #[tokio::test]
    async fn test_failed_rewind_is_retried() {
        let inner = FlakyRewind {
            inner: MemorySource::new("flaky", vec![solid(640, 360, 7)], CANONICAL_FRAME_SIZE),
            failures: 2,
            attempts: 0,
        };
        let mut source = LoopingSource::new(inner, CANONICAL_FRAME_SIZE);
        source.open().await.unwrap();

        assert_eq!(source.next_frame().await.unwrap().sequence, 1);
        assert!(source.next_frame().await.is_err());
        assert!(source.next_frame().await.is_err());
        assert_eq!(source.rewinds(), 0);

        let frame = source.next_frame().await.unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(frame.image.get_pixel(0, 0).0[0], 7);
        assert_eq!(source.rewinds(), 1);
        assert_eq!(source.inner.attempts, 3);
        assert_eq!(source.next_frame().await.unwrap().sequence, 3);
        assert_eq!(source.rewinds(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let mut source = FfmpegSource::new("/nonexistent/cam.mp4", CANONICAL_FRAME_SIZE);
        let err = source.open().await.unwrap_err();
        assert!(err.is_source_fatal());
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_ffmpeg_source_decodes_image() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("still.png");
        solid(1280, 720, 200).save(&path).unwrap();

        let mut source = FfmpegSource::new(path.to_str().unwrap(), CANONICAL_FRAME_SIZE);
        source.open().await.unwrap();
        let frame = source.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 360);

        source.rewind().await.unwrap();
        assert!(source.read_frame().await.unwrap().is_some());
    }
}
