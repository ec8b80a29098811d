// src/transport.rs
//
// Transport: play/pause/stop/seek plus record and export.
//
// The control side (`TransportEngine`) and the render side (`Renderer`)
// share only atomics. Seeks are requests picked up at the next block
// boundary; the requested time is reported back immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::capture::{CaptureSource, write_wav};
use crate::error::{EngineError, EngineResult};
use crate::manager::TimelineManager;

/// Externally visible transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
    Recording,
    Exporting,
}

//
// ===============================
// MARK: Shared state (lock-free)
// ===============================
//

const STOPPED: u8 = 0;
const PLAYING: u8 = 1;
const PAUSED: u8 = 2;

pub(crate) const CAPTURE_NONE: u8 = 0;
pub(crate) const CAPTURE_RECORDING: u8 = 1;
pub(crate) const CAPTURE_EXPORTING: u8 = 2;

/// Bits of a NaN; never a valid requested time.
const NO_SEEK: u64 = u64::MAX;

/// Atomics shared between transport and renderer.
#[derive(Debug)]
pub(crate) struct TransportShared {
    play_state: AtomicU8,
    capture_mode: AtomicU8,

    /// Set while the renderer is between reading the capture mode and
    /// finishing its push for the block
    capturing: AtomicBool,

    /// Pending seek in ms, stored as f64 bits (no AtomicF64 in std)
    seek_request: AtomicU64,

    /// Playhead in ms as f64 bits, published by the renderer
    position_ms: AtomicU64,

    pub blocks_rendered: Arc<AtomicU64>,
    overruns: AtomicU64,
}

impl TransportShared {
    pub(crate) fn new() -> Self {
        Self {
            play_state: AtomicU8::new(STOPPED),
            capture_mode: AtomicU8::new(CAPTURE_NONE),
            capturing: AtomicBool::new(false),
            seek_request: AtomicU64::new(NO_SEEK),
            position_ms: AtomicU64::new(0.0_f64.to_bits()),
            blocks_rendered: Arc::new(AtomicU64::new(0)),
            overruns: AtomicU64::new(0),
        }
    }

    // Render side

    #[inline]
    pub(crate) fn is_rolling(&self) -> bool {
        self.play_state.load(Ordering::Acquire) == PLAYING
    }

    #[inline]
    pub(crate) fn capture_mode(&self) -> u8 {
        self.capture_mode.load(Ordering::Acquire)
    }

    /// Mark the start of a block's capture and read the mode for it.
    /// Pair with `leave_capture` once the push is done.
    #[inline]
    pub(crate) fn enter_capture(&self) -> u8 {
        self.capturing.store(true, Ordering::SeqCst);
        self.capture_mode.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn leave_capture(&self) {
        self.capturing.store(false, Ordering::Release);
    }

    /// Take a pending seek, publishing it as the playhead.
    #[inline]
    pub(crate) fn take_seek(&self) -> Option<f64> {
        let request = self.seek_request.load(Ordering::Acquire);
        if request == NO_SEEK {
            return None;
        }
        self.position_ms.store(request, Ordering::Release);
        // A newer request stays pending for the next block.
        let _ = self.seek_request.compare_exchange(
            request,
            NO_SEEK,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        Some(f64::from_bits(request))
    }

    #[inline]
    pub(crate) fn publish_position(&self, ms: f64) {
        self.position_ms.store(ms.to_bits(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn block_done(&self) {
        self.blocks_rendered.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn count_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    // Control side

    fn request_seek(&self, ms: f64) {
        self.seek_request.store(ms.to_bits(), Ordering::Release);
    }

    fn playhead(&self) -> f64 {
        let request = self.seek_request.load(Ordering::Acquire);
        if request != NO_SEEK {
            return f64::from_bits(request);
        }
        f64::from_bits(self.position_ms.load(Ordering::Acquire))
    }

    fn set_play_state(&self, state: u8) {
        self.play_state.store(state, Ordering::Release);
    }

    fn play_state(&self) -> u8 {
        self.play_state.load(Ordering::Acquire)
    }

    fn set_capture_mode(&self, mode: u8) {
        self.capture_mode.store(mode, Ordering::SeqCst);
    }

    /// Wait out a block that read the previous capture mode. Bounded by
    /// the tail of one render block.
    fn wait_capture_idle(&self) {
        while self.capturing.load(Ordering::SeqCst) {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    pub(crate) fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

//
// ===================================
// MARK: Control-plane transport
// ===================================
//

/// Transport controller. Lives on the control plane.
pub struct TransportEngine {
    shared: Arc<TransportShared>,
    capture: CaptureSource,
    sample_rate: u32,
    recordings_dir: PathBuf,
    recordings: u32,
    reported_overruns: u64,
}

impl TransportEngine {
    pub(crate) fn new(
        shared: Arc<TransportShared>,
        capture: CaptureSource,
        sample_rate: u32,
        recordings_dir: PathBuf,
    ) -> Self {
        Self {
            shared,
            capture,
            sample_rate,
            recordings_dir,
            recordings: 0,
            reported_overruns: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        match self.shared.capture_mode() {
            CAPTURE_EXPORTING => TransportState::Exporting,
            CAPTURE_RECORDING => TransportState::Recording,
            _ => match self.shared.play_state() {
                PLAYING => TransportState::Playing,
                PAUSED => TransportState::Paused,
                _ => TransportState::Stopped,
            },
        }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_rolling()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.capture_mode() == CAPTURE_RECORDING
    }

    pub fn is_exporting(&self) -> bool {
        self.shared.capture_mode() == CAPTURE_EXPORTING
    }

    fn reject_while_exporting(&self, op: &str) -> EngineResult<()> {
        if self.is_exporting() {
            return Err(EngineError::illegal(format!("cannot {op} while exporting")));
        }
        Ok(())
    }

    /// Stopped/Paused -> Playing.
    pub fn start(&mut self) -> EngineResult<()> {
        self.reject_while_exporting("start")?;
        if self.shared.play_state() == PLAYING {
            return Err(EngineError::illegal("transport is already playing"));
        }
        self.shared.set_play_state(PLAYING);
        log::debug!("transport started at {} ms", self.get_playback_time());
        Ok(())
    }

    /// Playing -> Paused.
    pub fn pause(&mut self) -> EngineResult<()> {
        self.reject_while_exporting("pause")?;
        if self.shared.play_state() != PLAYING {
            return Err(EngineError::illegal("transport is not playing"));
        }
        self.shared.set_play_state(PAUSED);
        log::debug!("transport paused at {} ms", self.get_playback_time());
        Ok(())
    }

    /// Halt and rewind to the start.
    pub fn stop(&mut self) -> EngineResult<()> {
        self.reject_while_exporting("stop")?;
        self.shared.set_play_state(STOPPED);
        self.shared.request_seek(0.0);
        log::debug!("transport stopped");
        Ok(())
    }

    /// Move the playhead. Takes effect at the next block boundary.
    pub fn set_playback_time(&mut self, ms: f64) -> EngineResult<()> {
        if !ms.is_finite() || ms < 0.0 {
            return Err(EngineError::boundary(format!(
                "playback time {ms} is not a valid position"
            )));
        }
        self.shared.request_seek(ms);
        Ok(())
    }

    /// Current playhead in ms, including a seek not yet applied.
    pub fn get_playback_time(&self) -> f64 {
        self.shared.playhead()
    }

    // ───────────────────────────────────────────────────────────────
    // Capture
    // ───────────────────────────────────────────────────────────────

    fn begin_capture(&mut self, mode: u8) -> EngineResult<()> {
        match self.shared.capture_mode() {
            CAPTURE_NONE => {}
            CAPTURE_RECORDING => return Err(EngineError::illegal("already recording")),
            _ => return Err(EngineError::illegal("already exporting")),
        }
        self.capture.discard();
        self.reported_overruns = self.shared.overruns();
        self.shared.set_capture_mode(mode);
        Ok(())
    }

    fn end_capture(&mut self) -> Vec<f32> {
        self.shared.set_capture_mode(CAPTURE_NONE);
        self.shared.wait_capture_idle();
        self.pump();
        self.capture.take()
    }

    /// Capture the render input until `stop_recording`.
    pub fn start_recording(&mut self) -> EngineResult<()> {
        self.begin_capture(CAPTURE_RECORDING)?;
        log::debug!("recording started");
        Ok(())
    }

    /// Finish recording, write it to the recordings directory and bind it
    /// to `clip` on `channel`. Returns the written file.
    pub fn stop_recording(
        &mut self,
        clip: &str,
        channel: &str,
        manager: &mut TimelineManager,
    ) -> EngineResult<PathBuf> {
        if !self.is_recording() {
            return Err(EngineError::illegal("not recording"));
        }
        manager.clip(clip, channel)?;

        let samples = self.end_capture();
        std::fs::create_dir_all(&self.recordings_dir)
            .map_err(|e| EngineError::io(&self.recordings_dir, e))?;
        self.recordings += 1;
        let path = self
            .recordings_dir
            .join(format!("{channel}-{clip}-{}.wav", self.recordings));
        if let Err(e) = write_wav(&path, &samples, self.sample_rate) {
            log::error!("failed to write recording: {e}");
            return Err(e);
        }
        log::debug!(
            "recorded {} frames into {}",
            samples.len() / 2,
            path.display()
        );

        manager.set_clip_content(clip, channel, &path)?;
        Ok(path)
    }

    /// Render from `start_ms` and capture the master output until
    /// `stop_export`. Monitor output keeps playing.
    pub fn start_export(&mut self, start_ms: f64) -> EngineResult<()> {
        if !start_ms.is_finite() || start_ms < 0.0 {
            return Err(EngineError::boundary(format!(
                "export start {start_ms} is not a valid position"
            )));
        }
        self.begin_capture(CAPTURE_EXPORTING)?;
        self.shared.request_seek(start_ms);
        self.shared.set_play_state(PLAYING);
        log::debug!("export started at {start_ms} ms");
        Ok(())
    }

    /// Stop exporting and write the captured mix to `path`.
    ///
    /// On failure the captured audio is discarded. The transport ends
    /// stopped and rewound either way.
    pub fn stop_export(&mut self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        if !self.is_exporting() {
            return Err(EngineError::illegal("not exporting"));
        }
        self.shared.set_play_state(STOPPED);
        let samples = self.end_capture();
        self.shared.request_seek(0.0);

        match write_wav(path, &samples, self.sample_rate) {
            Ok(()) => {
                log::debug!(
                    "exported {} frames to {}",
                    samples.len() / 2,
                    path.display()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("export failed, captured audio discarded: {e}");
                Err(e)
            }
        }
    }

    /// Drain captured audio from the render pass. Returns samples moved.
    ///
    /// Call regularly while recording or exporting so the ring never fills.
    pub fn pump(&mut self) -> usize {
        let moved = self.capture.drain();
        let overruns = self.shared.overruns();
        if overruns > self.reported_overruns {
            log::warn!(
                "capture ring overran {} time(s); audio was dropped",
                overruns - self.reported_overruns
            );
            self.reported_overruns = overruns;
        }
        moved
    }

    /// Frames captured so far and already drained from the ring.
    pub fn captured_frames(&self) -> usize {
        self.capture.captured_len() / 2
    }

    /// Number of blocks the capture ring could not take in full.
    pub fn overruns(&self) -> u64 {
        self.shared.overruns()
    }

    /// Blocks rendered so far.
    pub fn blocks_rendered(&self) -> u64 {
        self.shared.blocks_rendered.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture_ring;

    fn transport() -> TransportEngine {
        let (_sink, source) = capture_ring(1024, 64);
        TransportEngine::new(
            Arc::new(TransportShared::new()),
            source,
            48_000,
            PathBuf::from("recordings"),
        )
    }

    #[test]
    fn test_start_pause_stop() {
        let mut t = transport();
        assert_eq!(t.state(), TransportState::Stopped);
        t.start().unwrap();
        assert_eq!(t.state(), TransportState::Playing);
        assert!(t.start().is_err());
        t.pause().unwrap();
        assert_eq!(t.state(), TransportState::Paused);
        assert!(t.pause().is_err());
        t.start().unwrap();
        t.set_playback_time(1234.0).unwrap();
        t.stop().unwrap();
        assert_eq!(t.state(), TransportState::Stopped);
        assert_eq!(t.get_playback_time(), 0.0);
    }

    #[test]
    fn test_seek_reads_back_in_every_state() {
        let mut t = transport();
        t.set_playback_time(500.0).unwrap();
        assert_eq!(t.get_playback_time(), 500.0);
        t.start().unwrap();
        t.set_playback_time(750.5).unwrap();
        assert_eq!(t.get_playback_time(), 750.5);
        t.pause().unwrap();
        t.set_playback_time(10.0).unwrap();
        assert_eq!(t.get_playback_time(), 10.0);
        t.start_export(0.0).unwrap();
        t.set_playback_time(42.0).unwrap();
        assert_eq!(t.get_playback_time(), 42.0);

        assert!(t.set_playback_time(-1.0).is_err());
        assert!(t.set_playback_time(f64::NAN).is_err());
    }

    #[test]
    fn test_render_side_seek_handshake() {
        let shared = TransportShared::new();
        shared.request_seek(300.0);
        assert_eq!(shared.take_seek(), Some(300.0));
        assert_eq!(shared.take_seek(), None);
        assert_eq!(shared.playhead(), 300.0);
        shared.publish_position(310.0);
        assert_eq!(shared.playhead(), 310.0);
    }

    #[test]
    fn test_export_and_record_are_exclusive() {
        let mut t = transport();
        t.start_export(0.0).unwrap();
        assert_eq!(t.state(), TransportState::Exporting);
        assert!(matches!(t.start_export(0.0), Err(EngineError::IllegalState(_))));
        assert!(matches!(t.start_recording(), Err(EngineError::IllegalState(_))));
        assert!(matches!(t.start(), Err(EngineError::IllegalState(_))));
        assert!(matches!(t.stop(), Err(EngineError::IllegalState(_))));

        let dir = tempfile::tempdir().unwrap();
        t.stop_export(dir.path().join("mix.wav")).unwrap();
        assert_eq!(t.state(), TransportState::Stopped);

        t.start_recording().unwrap();
        assert_eq!(t.state(), TransportState::Recording);
        assert!(matches!(t.start_export(0.0), Err(EngineError::IllegalState(_))));
    }

    #[test]
    fn test_stop_keeps_block_in_flight() {
        let shared = Arc::new(TransportShared::new());
        let (mut sink, source) = capture_ring(1024, 64);
        let mut t = TransportEngine::new(shared.clone(), source, 48_000, PathBuf::from("rec"));
        t.start_export(0.0).unwrap();

        // Render thread has read the mode but not pushed yet.
        assert_eq!(shared.enter_capture(), CAPTURE_EXPORTING);
        let render = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(sink.push(&[0.5; 8]));
            shared.leave_capture();
        });

        let captured = t.end_capture();
        render.join().unwrap();
        assert_eq!(captured, vec![0.5; 8]);
    }

    #[test]
    fn test_stop_export_without_export_fails() {
        let mut t = transport();
        let err = t.stop_export("mix.wav").unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
    }

    #[test]
    fn test_export_write_failure_discards_capture() {
        let mut t = transport();
        t.start_export(0.0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = t
            .stop_export(dir.path().join("no").join("such").join("mix.wav"))
            .unwrap_err();
        assert!(matches!(err, EngineError::IoFailure { .. }));
        assert_eq!(t.capture.captured_len(), 0);
        assert_eq!(t.state(), TransportState::Stopped);
    }
}
