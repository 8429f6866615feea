use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::device::CameraDevice;
use crate::gesture::{self, GestureMatch};
use crate::preview::select_optimal_size;
use crate::sequencer::{CaptureSequencer, CountdownConfig, Tick};
use crate::storage::PhotoStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No device held.
    Closed,
    /// Device acquired, preview not yet streaming.
    Open,
    /// Device acquired and live preview running.
    Previewing,
}

/// Asynchronous work marshaled back onto the owner task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Tick { request_id: u64 },
}

/// Owner of the camera lifecycle and the capture sequencer.
///
/// All state transitions happen on the task that drives this value; the
/// countdown timers run elsewhere and report back through the tick channel,
/// carrying the request id they were scheduled for. The device is only ever
/// commanded from here, so it needs no internal locking.
pub struct CaptureSession<D: CameraDevice> {
    device: D,
    lifecycle: Lifecycle,
    sequencer: CaptureSequencer,
    countdown: CountdownConfig,
    store: PhotoStore,
    match_threshold: f64,
    viewport: (u32, u32),
    ticks: mpsc::UnboundedSender<SessionEvent>,
}

impl<D: CameraDevice> CaptureSession<D> {
    pub fn new(
        device: D,
        config: &Config,
        store: PhotoStore,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let countdown = config.countdown();

        let session = Self {
            device,
            lifecycle: Lifecycle::Closed,
            sequencer: CaptureSequencer::new(countdown),
            countdown,
            store,
            match_threshold: config.recognizer.match_threshold,
            viewport: config.viewport(),
            ticks: ticks_tx,
        };
        (session, ticks_rx)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_idle(&self) -> bool {
        self.sequencer.is_idle()
    }

    /// Acquire the camera and bring up the live preview. On any failure
    /// after the device was acquired, it is released again before the error
    /// is surfaced; the session never holds a device outside Open/Previewing.
    pub async fn resume(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Closed {
            return Ok(());
        }

        self.device.open().await.context("Failed to open camera")?;
        self.lifecycle = Lifecycle::Open;

        if let Err(e) = self.start_streaming().await {
            self.device.close().await;
            self.lifecycle = Lifecycle::Closed;
            return Err(e);
        }

        self.lifecycle = Lifecycle::Previewing;
        info!("Camera session resumed");
        Ok(())
    }

    async fn start_streaming(&mut self) -> Result<()> {
        let sizes = self.device.supported_preview_sizes();
        let (width, height) = self.viewport;
        match select_optimal_size(&sizes, width, height) {
            Some(size) => {
                debug!("Selected {} for {}x{} viewport", size, width, height);
                self.device.set_preview_size(size).await?;
            }
            None => warn!("Camera reported no sizes; no size constraint applied"),
        }
        self.device.start_preview().await?;
        Ok(())
    }

    /// Tear the session down: invalidate any running countdown, stop the
    /// preview and release the device. Safe to call in any state.
    pub async fn pause(&mut self) {
        if self.sequencer.cancel() {
            info!("Pending capture cancelled by session pause");
        }

        match self.lifecycle {
            Lifecycle::Previewing => {
                let _ = self.device.stop_preview().await;
                self.device.close().await;
            }
            Lifecycle::Open => self.device.close().await,
            Lifecycle::Closed => {}
        }
        self.lifecycle = Lifecycle::Closed;
    }

    /// Feed one recognition event into the capture decision. Arms the
    /// sequencer and schedules its countdown when a template matched.
    pub fn on_gesture(&mut self, matches: &[GestureMatch]) {
        if self.lifecycle != Lifecycle::Previewing {
            debug!("Recognition event ignored: no live camera session");
            return;
        }

        let Some(matched) = gesture::best_match(matches, self.match_threshold) else {
            return;
        };

        let Some(request) = self.sequencer.trigger() else {
            debug!(
                "Gesture '{}' ignored: a capture is already armed",
                matched.name
            );
            return;
        };

        let total_secs = (request.step_duration * request.steps).as_secs();
        info!(
            "Gesture '{}' matched (score {:.2}) - photo in {}s",
            matched.name, matched.score, total_secs
        );

        // One flat timer task per request; it is never cancelled, its ticks
        // just go stale when the request id stops matching
        let ticks = self.ticks.clone();
        tokio::spawn(async move {
            for _ in 0..request.steps {
                tokio::time::sleep(request.step_duration).await;
                let tick = SessionEvent::Tick {
                    request_id: request.request_id,
                };
                if ticks.send(tick).is_err() {
                    break;
                }
            }
        });
    }

    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Tick { request_id } => match self.sequencer.tick(request_id) {
                // Superseded countdown; not an error
                Tick::Stale => Ok(()),
                Tick::Cue { remaining } => {
                    let secs = (self.countdown.step_duration() * remaining).as_secs();
                    info!("Photo in {}s", secs);
                    Ok(())
                }
                Tick::Fire => self.fire(request_id).await,
            },
        }
    }

    /// Countdown elapsed: issue the shutter command, hand the bytes off to
    /// the store and bring the preview back.
    async fn fire(&mut self, request_id: u64) -> Result<()> {
        if self.lifecycle != Lifecycle::Previewing {
            // The device went away between the last cue and the fire tick
            error!("Shutter aborted: camera session closed mid-countdown");
            self.sequencer.cancel();
            return Ok(());
        }

        match self.device.capture().await {
            Ok(bytes) => {
                self.store.spawn_save(bytes);
                if let Err(e) = self.device.start_preview().await {
                    warn!("Could not resume preview after capture: {}", e);
                }
                self.sequencer.complete(request_id);
                Ok(())
            }
            Err(e) => {
                self.sequencer.cancel();
                if let Err(e) = self.device.start_preview().await {
                    warn!("Could not resume preview after failed capture: {}", e);
                }
                Err(e).context("Still capture failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::device::DeviceError;
    use crate::preview::PreviewSize;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockState {
        opens: u32,
        closes: u32,
        preview_starts: u32,
        preview_stops: u32,
        captures: u32,
        committed_size: Option<PreviewSize>,
        fail_open: bool,
        fail_capture: bool,
        jpeg: Vec<u8>,
        sizes: Vec<PreviewSize>,
    }

    #[derive(Clone)]
    struct MockCamera {
        state: Arc<Mutex<MockState>>,
    }

    impl MockCamera {
        fn new(jpeg: Vec<u8>) -> Self {
            let state = MockState {
                jpeg,
                sizes: vec![PreviewSize::new(640, 480), PreviewSize::new(1296, 972)],
                ..Default::default()
            };
            Self {
                state: Arc::new(Mutex::new(state)),
            }
        }

        fn state(&self) -> Arc<Mutex<MockState>> {
            Arc::clone(&self.state)
        }
    }

    #[async_trait]
    impl CameraDevice for MockCamera {
        async fn open(&mut self) -> Result<(), DeviceError> {
            let mut s = self.state.lock().unwrap();
            if s.fail_open {
                return Err(DeviceError::Unavailable("no camera".into()));
            }
            s.opens += 1;
            Ok(())
        }

        fn supported_preview_sizes(&self) -> Vec<PreviewSize> {
            self.state.lock().unwrap().sizes.clone()
        }

        async fn set_preview_size(&mut self, size: PreviewSize) -> Result<(), DeviceError> {
            self.state.lock().unwrap().committed_size = Some(size);
            Ok(())
        }

        async fn start_preview(&mut self) -> Result<(), DeviceError> {
            self.state.lock().unwrap().preview_starts += 1;
            Ok(())
        }

        async fn stop_preview(&mut self) -> Result<(), DeviceError> {
            self.state.lock().unwrap().preview_stops += 1;
            Ok(())
        }

        async fn capture(&mut self) -> Result<Vec<u8>, DeviceError> {
            let mut s = self.state.lock().unwrap();
            s.captures += 1;
            if s.fail_capture {
                return Err(DeviceError::CaptureFailed("shutter jammed".into()));
            }
            Ok(s.jpeg.clone())
        }

        async fn close(&mut self) {
            self.state.lock().unwrap().closes += 1;
        }
    }

    fn test_config(dir: &Path) -> Config {
        ConfigBuilder::new()
            .display_size(640, 480)
            .match_threshold(3.0)
            .countdown(3000, 3)
            .save_dir(dir.join("photos"))
            .build()
            .unwrap()
    }

    fn matched() -> Vec<GestureMatch> {
        vec![GestureMatch::new("circle", 3.4)]
    }

    async fn drain_ticks(
        session: &mut CaptureSession<MockCamera>,
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
        count: usize,
    ) -> Vec<Result<()>> {
        let mut results = Vec::new();
        for _ in 0..count {
            let event = rx.recv().await.expect("tick channel closed");
            results.push(session.handle_event(event).await);
        }
        results
    }

    #[tokio::test]
    async fn test_resume_selects_size_and_starts_preview() {
        let temp = TempDir::new().unwrap();
        let camera = MockCamera::new(vec![1, 2, 3]);
        let state = camera.state();
        let config = test_config(temp.path());
        let store = PhotoStore::new(config.paths.save_dir.clone());
        let (mut session, _ticks) = CaptureSession::new(camera, &config, store);

        session.resume().await.unwrap();

        assert_eq!(session.lifecycle(), Lifecycle::Previewing);
        let s = state.lock().unwrap();
        assert_eq!(s.opens, 1);
        assert_eq!(s.preview_starts, 1);
        // 640x480 viewport: the exact-ratio exact-height candidate wins
        assert_eq!(s.committed_size, Some(PreviewSize::new(640, 480)));
    }

    #[tokio::test]
    async fn test_open_failure_leaves_session_closed() {
        let temp = TempDir::new().unwrap();
        let camera = MockCamera::new(vec![]);
        camera.state().lock().unwrap().fail_open = true;
        let config = test_config(temp.path());
        let store = PhotoStore::new(config.paths.save_dir.clone());
        let (mut session, _ticks) = CaptureSession::new(camera, &config, store);

        assert!(session.resume().await.is_err());
        assert_eq!(session.lifecycle(), Lifecycle::Closed);

        // With no live session, recognition events do nothing
        session.on_gesture(&matched());
        assert!(session.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_while_armed_takes_one_photo() {
        let temp = TempDir::new().unwrap();
        let camera = MockCamera::new(vec![1, 2, 3]);
        let state = camera.state();
        let config = test_config(temp.path());
        let store = PhotoStore::new(config.paths.save_dir.clone());
        let (mut session, mut ticks) = CaptureSession::new(camera, &config, store);
        session.resume().await.unwrap();

        session.on_gesture(&matched());
        session.on_gesture(&matched());

        // Only the first trigger scheduled a countdown: three ticks total
        drain_ticks(&mut session, &mut ticks, 3).await;
        assert!(ticks.try_recv().is_err());

        let s = state.lock().unwrap();
        assert_eq!(s.captures, 1);
        drop(s);
        assert!(session.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_while_armed_never_fires_shutter() {
        let temp = TempDir::new().unwrap();
        let camera = MockCamera::new(vec![1, 2, 3]);
        let state = camera.state();
        let config = test_config(temp.path());
        let store = PhotoStore::new(config.paths.save_dir.clone());
        let (mut session, mut ticks) = CaptureSession::new(camera, &config, store);
        session.resume().await.unwrap();

        session.on_gesture(&matched());
        session.pause().await;
        assert_eq!(session.lifecycle(), Lifecycle::Closed);

        // The countdown task still delivers all its ticks; every one is stale
        drain_ticks(&mut session, &mut ticks, 3).await;

        let s = state.lock().unwrap();
        assert_eq!(s.captures, 0);
        assert_eq!(s.preview_stops, 1);
        assert_eq!(s.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_capture_persists_bytes_and_resumes_preview() {
        let temp = TempDir::new().unwrap();
        let jpeg: Vec<u8> = (0..=255u8).cycle().take(1234).collect();
        let camera = MockCamera::new(jpeg.clone());
        let state = camera.state();
        let config = test_config(temp.path());
        let (gallery_tx, mut gallery_rx) = mpsc::unbounded_channel();
        let store =
            PhotoStore::new(config.paths.save_dir.clone()).with_gallery_notifier(gallery_tx);
        let (mut session, mut ticks) = CaptureSession::new(camera, &config, store);
        session.resume().await.unwrap();

        session.on_gesture(&matched());
        let results = drain_ticks(&mut session, &mut ticks, 3).await;
        assert!(results.iter().all(|r| r.is_ok()));

        // The background save owns its copy of the bytes
        let saved_path = gallery_rx.recv().await.unwrap();
        assert_eq!(std::fs::read(&saved_path).unwrap(), jpeg);

        let s = state.lock().unwrap();
        assert_eq!(s.captures, 1);
        assert_eq!(s.preview_starts, 2); // initial + resumed after capture
        drop(s);
        assert!(session.is_idle());
        assert_eq!(session.lifecycle(), Lifecycle::Previewing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_forces_idle_and_surfaces_error() {
        let temp = TempDir::new().unwrap();
        let camera = MockCamera::new(vec![1, 2, 3]);
        let state = camera.state();
        state.lock().unwrap().fail_capture = true;
        let config = test_config(temp.path());
        let store = PhotoStore::new(config.paths.save_dir.clone());
        let (mut session, mut ticks) = CaptureSession::new(camera, &config, store);
        session.resume().await.unwrap();

        session.on_gesture(&matched());
        let results = drain_ticks(&mut session, &mut ticks, 3).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_err());
        assert!(session.is_idle());

        // No automatic retry, but a later gesture starts a fresh cycle
        state.lock().unwrap().fail_capture = false;
        session.on_gesture(&matched());
        let results = drain_ticks(&mut session, &mut ticks, 3).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(state.lock().unwrap().captures, 2);
        assert!(session.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_score_at_threshold_does_not_arm() {
        let temp = TempDir::new().unwrap();
        let camera = MockCamera::new(vec![1, 2, 3]);
        let config = test_config(temp.path());
        let store = PhotoStore::new(config.paths.save_dir.clone());
        let (mut session, mut ticks) = CaptureSession::new(camera, &config, store);
        session.resume().await.unwrap();

        session.on_gesture(&[GestureMatch::new("circle", 3.0)]);

        assert!(session.is_idle());
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ticks_from_previous_cycle_are_dropped() {
        let temp = TempDir::new().unwrap();
        let camera = MockCamera::new(vec![1, 2, 3]);
        let state = camera.state();
        let config = test_config(temp.path());
        let store = PhotoStore::new(config.paths.save_dir.clone());
        let (mut session, mut ticks) = CaptureSession::new(camera, &config, store);

        session.resume().await.unwrap();
        session.on_gesture(&matched());
        session.pause().await;
        session.resume().await.unwrap();
        session.on_gesture(&matched());

        // Two countdown tasks are live; only the second request may fire
        drain_ticks(&mut session, &mut ticks, 6).await;

        assert_eq!(state.lock().unwrap().captures, 1);
        assert!(session.is_idle());
    }
}
