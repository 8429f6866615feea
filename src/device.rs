use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Duration};

use crate::preview::PreviewSize;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The camera session boundary.
///
/// The owning session guarantees the call discipline: `open` before anything
/// else, `stop_preview` + `close` on every teardown path, never `capture`
/// without an open device. Implementations still refuse out-of-order calls
/// with `DeviceError::Unavailable` rather than panicking.
#[async_trait]
pub trait CameraDevice: Send {
    /// Acquire the physical camera. Reports `Unavailable` when no camera
    /// (or no camera tooling) is present.
    async fn open(&mut self) -> Result<(), DeviceError>;

    /// Resolutions the device can capture at. May be empty.
    fn supported_preview_sizes(&self) -> Vec<PreviewSize>;

    /// Commit a capture resolution. Must be applied before the preview
    /// stream is (re)started.
    async fn set_preview_size(&mut self, size: PreviewSize) -> Result<(), DeviceError>;

    async fn start_preview(&mut self) -> Result<(), DeviceError>;

    async fn stop_preview(&mut self) -> Result<(), DeviceError>;

    /// Expose and encode one still image, returning the encoded bytes.
    async fn capture(&mut self) -> Result<Vec<u8>, DeviceError>;

    /// Release the camera. Idempotent.
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureTool {
    Rpicam,
    Raspistill,
}

/// Raspberry Pi camera driven through the stock libcamera command-line
/// tooling (`rpicam-still`, with legacy `raspistill` fallback).
pub struct RpicamCamera {
    /// Committed capture resolution.
    width: u32,
    height: u32,
    /// JPEG quality (0-100)
    quality: u8,
    /// Temporary file path for captured images
    still_path: String,
    /// Preview image path for the live feed file
    preview_path: String,
    tool: Option<CaptureTool>,
    /// Preview process handle
    preview_process: Option<Child>,
}

/// Sensor modes of the stock camera module (IMX219).
const SENSOR_MODES: [(u32, u32); 6] = [
    (640, 480),
    (1280, 720),
    (1640, 922),
    (1640, 1232),
    (1920, 1080),
    (3280, 2464),
];

impl RpicamCamera {
    pub fn new(quality: u8) -> Self {
        Self {
            width: 800,
            height: 600,
            quality: quality.min(100),
            still_path: "/tmp/gesturecam_capture.jpg".to_string(),
            preview_path: "/tmp/gesturecam_preview.jpg".to_string(),
            tool: None,
            preview_process: None,
        }
    }

    fn is_open(&self) -> bool {
        self.tool.is_some()
    }

    async fn run_rpicam_still(&self) -> bool {
        let args = [
            "-o",
            &self.still_path,
            "--width",
            &self.width.to_string(),
            "--height",
            &self.height.to_string(),
            "--quality",
            &self.quality.to_string(),
            "--immediate", // Take photo immediately without preview
            "--nopreview", // Disable preview window
            "--timeout",
            "1000",
        ];

        log::debug!("Capture command: rpicam-still {}", args.join(" "));

        match Command::new("rpicam-still").args(args).output().await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                log::warn!("rpicam-still failed with status: {}", output.status);
                log::warn!("stderr: {}", String::from_utf8_lossy(&output.stderr));
                false
            }
            Err(e) => {
                log::warn!("rpicam-still command failed: {}", e);
                false
            }
        }
    }

    async fn run_raspistill(&self) -> bool {
        let args = [
            "-o",
            &self.still_path,
            "-w",
            &self.width.to_string(),
            "-h",
            &self.height.to_string(),
            "-q",
            &self.quality.to_string(),
            "-t",
            "1000",
            "-n", // No preview
        ];

        log::debug!("Capture command: raspistill {}", args.join(" "));

        match Command::new("raspistill").args(args).output().await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                log::error!("raspistill failed with status: {}", output.status);
                false
            }
            Err(e) => {
                log::error!("raspistill command failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl CameraDevice for RpicamCamera {
    async fn open(&mut self) -> Result<(), DeviceError> {
        log::info!("Initializing camera...");

        // Probe the modern tool first, then the legacy one
        match Command::new("rpicam-still").arg("--help").output().await {
            Ok(_) => {
                self.tool = Some(CaptureTool::Rpicam);
                log::info!("Camera initialized (using rpicam-still)");
                Ok(())
            }
            Err(e) => {
                log::warn!("rpicam-still not found: {}", e);
                match Command::new("raspistill").arg("-?").output().await {
                    Ok(_) => {
                        self.tool = Some(CaptureTool::Raspistill);
                        log::info!("Camera initialized (using legacy raspistill)");
                        Ok(())
                    }
                    Err(e) => Err(DeviceError::Unavailable(format!(
                        "neither rpicam-still nor raspistill found: {}",
                        e
                    ))),
                }
            }
        }
    }

    fn supported_preview_sizes(&self) -> Vec<PreviewSize> {
        SENSOR_MODES
            .iter()
            .map(|&(w, h)| PreviewSize::new(w, h))
            .collect()
    }

    async fn set_preview_size(&mut self, size: PreviewSize) -> Result<(), DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::Unavailable("camera not open".into()));
        }
        self.width = size.width;
        self.height = size.height;
        log::info!("Capture resolution committed: {}", size);
        Ok(())
    }

    async fn start_preview(&mut self) -> Result<(), DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::Unavailable("camera not open".into()));
        }

        // Replace any existing preview process
        self.stop_preview().await?;

        let args = [
            "-o",
            &self.preview_path,
            "--width",
            &self.width.to_string(),
            "--height",
            &self.height.to_string(),
            "--quality",
            "70", // Lower quality for faster preview
            "--timeout",
            "0", // Continuous mode
            "--nopreview",
            "--signal",
            "--loop",
        ];

        log::debug!("Preview command: rpicam-still {}", args.join(" "));

        let child = Command::new("rpicam-still")
            .args(args)
            .kill_on_drop(true)
            .spawn()?;
        self.preview_process = Some(child);
        log::info!("Camera preview started");
        Ok(())
    }

    async fn stop_preview(&mut self) -> Result<(), DeviceError> {
        if let Some(mut process) = self.preview_process.take() {
            process.start_kill().ok();
            let _ = process.wait().await;
            log::info!("Camera preview stopped");
        }
        Ok(())
    }

    async fn capture(&mut self) -> Result<Vec<u8>, DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::Unavailable("camera not open".into()));
        }

        // The sensor is exclusive: the preview loop must not hold it while
        // the still capture runs
        self.stop_preview().await?;

        if Path::new(&self.still_path).exists() {
            let _ = fs::remove_file(&self.still_path).await;
        }

        // Give the camera a moment to adjust exposure
        sleep(Duration::from_millis(500)).await;

        let success = match self.tool {
            Some(CaptureTool::Rpicam) => {
                if self.run_rpicam_still().await {
                    true
                } else {
                    log::warn!("Trying raspistill fallback...");
                    self.run_raspistill().await
                }
            }
            Some(CaptureTool::Raspistill) => self.run_raspistill().await,
            None => false,
        };

        if !success {
            return Err(DeviceError::CaptureFailed(
                "still capture tool reported failure".into(),
            ));
        }

        let bytes = fs::read(&self.still_path).await.map_err(|e| {
            DeviceError::CaptureFailed(format!("could not read captured image: {}", e))
        })?;
        let _ = fs::remove_file(&self.still_path).await;

        // The bytes are persisted verbatim; decode only to validate them
        match image::load_from_memory(&bytes) {
            Ok(img) => {
                let rgb = img.to_rgb8();
                log::info!("Photo captured: {}x{}", rgb.width(), rgb.height());
                Ok(bytes)
            }
            Err(e) => Err(DeviceError::CaptureFailed(format!(
                "captured image is not decodable: {}",
                e
            ))),
        }
    }

    async fn close(&mut self) {
        let _ = self.stop_preview().await;
        self.tool = None;
        log::info!("Camera released");
    }
}

impl Drop for RpicamCamera {
    fn drop(&mut self) {
        // Preview child is killed via kill_on_drop; clean up leftovers
        for path in [&self.still_path, &self.preview_path] {
            if Path::new(path).exists() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Development stand-in for machines without the Pi camera stack. Produces
/// a gradient test pattern encoded as a real JPEG.
pub struct FakeCamera {
    width: u32,
    height: u32,
    quality: u8,
    open: bool,
}

impl FakeCamera {
    pub fn new(quality: u8) -> Self {
        Self {
            width: 800,
            height: 600,
            quality: quality.min(100),
            open: false,
        }
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn open(&mut self) -> Result<(), DeviceError> {
        self.open = true;
        log::info!("Simulated camera initialized");
        Ok(())
    }

    fn supported_preview_sizes(&self) -> Vec<PreviewSize> {
        vec![
            PreviewSize::new(640, 480),
            PreviewSize::new(800, 600),
            PreviewSize::new(1280, 720),
        ]
    }

    async fn set_preview_size(&mut self, size: PreviewSize) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::Unavailable("camera not open".into()));
        }
        self.width = size.width;
        self.height = size.height;
        Ok(())
    }

    async fn start_preview(&mut self) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::Unavailable("camera not open".into()));
        }
        log::debug!("Simulated preview running");
        Ok(())
    }

    async fn stop_preview(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn capture(&mut self) -> Result<Vec<u8>, DeviceError> {
        if !self.open {
            return Err(DeviceError::Unavailable("camera not open".into()));
        }

        let (width, height) = (self.width, self.height);
        let img = image::ImageBuffer::from_fn(width, height, |x, y| {
            let r = (x * 255 / width) as u8;
            let g = (y * 255 / height) as u8;
            let b = ((x + y) * 255 / (width + height)) as u8;
            image::Rgb([r, g, b])
        });

        let mut cursor = std::io::Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageOutputFormat::Jpeg(self.quality))
            .map_err(|e| DeviceError::CaptureFailed(format!("test pattern encode: {}", e)))?;
        Ok(cursor.into_inner())
    }

    async fn close(&mut self) {
        self.open = false;
    }
}
