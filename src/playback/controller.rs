//! Playback Controller
//!
//! Single-threaded and tick driven. Every network fetch, video event and
//! readback completes through a channel that [`HoloPlayer::tick`] polls,
//! so no call here ever blocks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::state::PlaybackState;
use crate::codec::DecodeBounds;
use crate::config::{DecodeBackendKind, OpenOptions, PlayerConfig};
use crate::constants::pools::{MIN_OPEN_BUFFERS, MIN_OPEN_SEGMENTS};
use crate::error::{PlayerError, PlayerResult};
use crate::manifest::{FileInfo, ManifestError, Segment, StreamLayout};
use crate::mesh::{
    create_backend, DecodeBackend, DecodeError, DecodedFrame, FallbackFrame, GpuBackend,
    MeshDecoder,
};
use crate::streaming::{
    url_root, BufferRing, FetchHandle, Fetcher, PlayError, PoolEvent, ReadyState, RingEvent,
    VideoBackend, VideoPool,
};
use crate::sync::{CpuReadback, FrameSynchronizer, GpuReadback, PixelReadback, WatermarkLayout};

static INSTANCE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Notifications delivered through [`HoloPlayer::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Manifest resolved; carries what the renderer needs to allocate
    Loaded(FileInfo),
    /// The last segment finished and looping is off
    EndOfStream,
}

/// What the renderer should draw right now.
#[derive(Debug, Clone, Copy)]
pub enum CurrentFrame<'a> {
    Fallback(&'a FallbackFrame),
    Decoded(&'a DecodedFrame),
}

/// Per-frame draw parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// `None` while the fallback frame is shown
    pub frame_index: Option<usize>,
    /// Index count to draw
    pub primitive_count: usize,
    pub bounds: DecodeBounds,
}

enum FallbackState {
    Waiting,
    Ready(FallbackFrame),
    Unavailable,
}

/// Everything tied to one opened stream.
struct Session {
    layout: StreamLayout,
    ring: BufferRing,
    videos: VideoPool,
    sync: FrameSynchronizer,
    fallback: FallbackState,
    current_segment: usize,
    min_buffers: usize,
    min_videos: usize,
    /// Readback slot whose image matches the decoded mesh
    presentable_slot: Option<usize>,
}

pub struct HoloPlayer {
    id: usize,
    config: PlayerConfig,
    fetcher: Arc<dyn Fetcher>,
    video_backend: Box<dyn VideoBackend>,
    gpu: Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)>,
    decoder: MeshDecoder,

    state: PlaybackState,
    options: OpenOptions,
    /// Video paused by us (stall or missing mesh data), eligible for auto-resume
    suspended: bool,
    need_mesh_data: bool,
    was_playing: bool,
    end_of_stream: bool,

    manifest_fetch: Option<(FetchHandle, String)>,
    session: Option<Session>,
    last_update: Option<Instant>,

    events_tx: flume::Sender<PlayerEvent>,
    events_rx: flume::Receiver<PlayerEvent>,
}

fn watermark_layout(config: &PlayerConfig, segment: &Segment) -> WatermarkLayout {
    WatermarkLayout::new(config.watermark_layout, segment.block_size)
        .with_threshold(config.watermark_threshold)
}

impl HoloPlayer {
    /// Player with CPU readback and the configured CPU decode path.
    pub fn new(
        config: PlayerConfig,
        fetcher: Arc<dyn Fetcher>,
        video_backend: Box<dyn VideoBackend>,
    ) -> PlayerResult<Self> {
        config.validate()?;
        let decoder = MeshDecoder::new(create_backend(config.decode_backend));
        Ok(Self::build(config, fetcher, video_backend, decoder, None))
    }

    /// Player sharing the renderer's device for readback and, if
    /// configured, accelerated decode.
    pub fn with_gpu(
        config: PlayerConfig,
        fetcher: Arc<dyn Fetcher>,
        video_backend: Box<dyn VideoBackend>,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    ) -> PlayerResult<Self> {
        config.validate()?;
        let backend: Box<dyn DecodeBackend> = match config.decode_backend {
            DecodeBackendKind::Gpu => Box::new(GpuBackend::new(device.clone(), queue.clone())),
            other => create_backend(other),
        };
        let decoder = MeshDecoder::new(backend);
        Ok(Self::build(
            config,
            fetcher,
            video_backend,
            decoder,
            Some((device, queue)),
        ))
    }

    fn build(
        config: PlayerConfig,
        fetcher: Arc<dyn Fetcher>,
        video_backend: Box<dyn VideoBackend>,
        decoder: MeshDecoder,
        gpu: Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)>,
    ) -> Self {
        let id = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = flume::unbounded();
        log::info!("[HoloPlayer {}] Created with {} decode path", id, decoder.backend_name());
        Self {
            id,
            config,
            fetcher,
            video_backend,
            gpu,
            decoder,
            state: PlaybackState::Empty,
            options: OpenOptions::default(),
            suspended: false,
            need_mesh_data: false,
            was_playing: false,
            end_of_stream: false,
            manifest_fetch: None,
            session: None,
            last_update: None,
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Receiver for load and end-of-stream notifications.
    pub fn events(&self) -> flume::Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        self.session.as_ref().map(|s| &s.layout.file_info)
    }

    pub fn current_segment(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.current_segment)
    }

    pub fn buffer_ring(&self) -> Option<&BufferRing> {
        self.session.as_ref().map(|s| &s.ring)
    }

    /// Readback slot holding the video image that matches the current mesh.
    pub fn presentable_slot(&self) -> Option<usize> {
        self.session.as_ref()?.presentable_slot
    }

    fn emit(&self, event: PlayerEvent) {
        // We hold a receiver, the channel cannot be disconnected
        let _ = self.events_tx.send(event);
    }

    fn reset_for_open(&mut self, options: OpenOptions) {
        self.options = options;
        self.suspended = false;
        self.need_mesh_data = false;
        self.was_playing = false;
        self.end_of_stream = false;
        self.manifest_fetch = None;
        self.session = None;
        self.last_update = None;
        self.decoder.reset();
        self.state = PlaybackState::Opening;
    }

    /// Start loading a stream. Any open stream is closed first.
    pub fn open(&mut self, manifest_url: &str, options: OpenOptions) {
        if self.state.is_active() {
            self.close();
        }
        self.reset_for_open(options);
        log::info!("[HoloPlayer {}] Opening {}", self.id, manifest_url);
        let handle = self.fetcher.fetch(manifest_url);
        self.manifest_fetch = Some((handle, url_root(manifest_url).to_string()));
    }

    /// Open an already resolved stream. URIs resolve against `url_root`.
    pub fn open_layout(
        &mut self,
        layout: StreamLayout,
        url_root: &str,
        options: OpenOptions,
    ) -> PlayerResult<()> {
        if self.state.is_active() {
            self.close();
        }
        self.reset_for_open(options);
        self.start_session(layout, url_root)
    }

    fn start_session(&mut self, layout: StreamLayout, url_root: &str) -> PlayerResult<()> {
        if layout.timeline.is_empty() {
            self.state = PlaybackState::Closed;
            return Err(ManifestError::EmptyTimeline.into());
        }
        if layout.buffers.len() < 2 {
            self.state = PlaybackState::Closed;
            return Err(ManifestError::NoStreamBuffers {
                count: layout.buffers.len(),
            }
            .into());
        }
        if layout.frames.is_empty() {
            self.state = PlaybackState::Closed;
            return Err(ManifestError::NoFrames.into());
        }

        let segments = layout.timeline.len();
        let min_buffers = MIN_OPEN_BUFFERS.min(layout.buffers.len() - 1);
        let min_videos = MIN_OPEN_SEGMENTS.min(segments);

        let ring = BufferRing::new(self.fetcher.clone(), url_root, layout.buffers.clone());
        let videos = VideoPool::new(
            self.video_backend.as_mut(),
            self.config.effective_video_pool_size(segments),
            layout.timeline.clone(),
            url_root,
            self.options,
            self.config.preload_strategy,
            self.config.preferred_formats.clone(),
            self.config.audio_volume,
        );

        // One region large enough for every segment's watermark
        let region = layout
            .timeline
            .iter()
            .map(|s| watermark_layout(&self.config, s).region())
            .fold((0, 0), |acc, r| (acc.0.max(r.0), acc.1.max(r.1)));
        let depth = self.config.readback_depth;
        let readback: Box<dyn PixelReadback> = match &self.gpu {
            Some((device, queue)) => Box::new(GpuReadback::new(device.clone(), queue.clone(), depth, region)),
            None => Box::new(CpuReadback::new(depth, region)),
        };
        let sync = FrameSynchronizer::new(readback, watermark_layout(&self.config, &layout.timeline[0]));

        let fallback = if layout.fallback.is_some() {
            FallbackState::Waiting
        } else {
            FallbackState::Unavailable
        };

        log::info!(
            "[HoloPlayer {}] Stream loaded: {} frames, {} segments, opening needs {} buffers + {} videos",
            self.id,
            layout.frames.len(),
            segments,
            min_buffers,
            min_videos
        );
        self.emit(PlayerEvent::Loaded(layout.file_info.clone()));

        let mut session = Session {
            layout,
            ring,
            videos,
            sync,
            fallback,
            current_segment: 0,
            min_buffers,
            min_videos,
            presentable_slot: None,
        };
        session.videos.load_next();
        session.ring.load_next();
        self.session = Some(session);
        Ok(())
    }

    /// Advance the player: collect finished loads, follow the video's
    /// watermark and decode mesh frames up to it. Returns whether there is
    /// a frame to draw.
    pub fn tick(&mut self) -> PlayerResult<bool> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> PlayerResult<bool> {
        if !self.state.is_active() {
            return Ok(false);
        }

        self.poll_manifest()?;
        if self.session.is_none() {
            return Ok(false);
        }

        self.pump_buffers();
        self.pump_videos();

        // Nothing is synchronized until the still frame is up
        if matches!(self.session.as_ref().map(|s| &s.fallback), Some(FallbackState::Waiting)) {
            return Ok(false);
        }

        self.resume_stalled();
        self.synchronize(now)?;
        Ok(self.current_frame().is_some())
    }

    fn poll_manifest(&mut self) -> PlayerResult<()> {
        let Some(result) = self.manifest_fetch.as_ref().and_then(|(h, _)| h.try_complete()) else {
            return Ok(());
        };
        let Some((_, root)) = self.manifest_fetch.take() else {
            return Ok(());
        };

        let layout = result
            .map_err(PlayerError::from)
            .and_then(|bytes| StreamLayout::from_slice(&bytes).map_err(PlayerError::from));
        match layout {
            Ok(layout) => self.start_session(layout, &root),
            Err(e) => {
                log::error!("[HoloPlayer {}] Could not load manifest: {}", self.id, e);
                self.state = PlaybackState::Closed;
                Err(e)
            }
        }
    }

    fn pump_buffers(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut loaded = false;
        while let Some(event) = session.ring.poll() {
            match event {
                RingEvent::FallbackCaptured => {
                    session.fallback = match (&session.layout.fallback, session.ring.fallback_bytes()) {
                        (Some(layout), Some(bytes)) => match FallbackFrame::from_bytes(layout, bytes) {
                            Ok(frame) => {
                                log::info!("[HoloPlayer {}] Fallback frame ready", self.id);
                                FallbackState::Ready(frame)
                            }
                            Err(e) => {
                                log::error!("[HoloPlayer {}] Fallback frame unusable: {}", self.id, e);
                                FallbackState::Unavailable
                            }
                        },
                        _ => FallbackState::Unavailable,
                    };
                }
                RingEvent::Loaded { .. } => loaded = true,
                RingEvent::Failed { .. } => break,
            }
        }

        if !session.ring.is_loading()
            && (self.state == PlaybackState::Opening || self.need_mesh_data)
        {
            session.ring.load_next();
        }

        if loaded {
            self.need_mesh_data = false;
            self.start_playback_if_ready();
        }
    }

    fn pump_videos(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        for event in session.videos.poll() {
            match event {
                PoolEvent::Preloaded { .. } => self.start_playback_if_ready(),
                PoolEvent::Ended { segment } => self.on_segment_ended(segment),
            }
        }
    }

    fn start_playback_if_ready(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        if self.state == PlaybackState::Opening
            && session.ring.buffers_loaded() >= session.min_buffers
            && session.videos.videos_loaded() >= session.min_videos
        {
            log::info!("[HoloPlayer {}] State -> Opened", self.id);
            self.state = PlaybackState::Opened;
            if self.options.autoplay {
                if let Err(e) = self.play() {
                    log::info!("[HoloPlayer {}] Autoplay failed: {}", self.id, e);
                }
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let segment = session.current_segment;
        let Some(status) = session.videos.status(segment) else {
            return;
        };

        if self.suspended {
            if (status.paused || !status.playing) && status.preloaded {
                log::info!("[HoloPlayer {}] Segment {} was suspended, resuming", self.id, segment);
                self.suspended = false;
                if let Err(e) = session.videos.play(segment) {
                    log::info!("[HoloPlayer {}] Resume prevented: {}", self.id, e);
                }
            }
        } else if self.state == PlaybackState::Playing && (!status.playing || status.paused) {
            if let Err(e) = session.videos.play(segment) {
                log::info!("[HoloPlayer {}] Play prevented: {}", self.id, e);
            }
        }
    }

    fn on_segment_ended(&mut self, segment: usize) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let count = session.layout.timeline.len();

        if session.current_segment == count - 1 && !self.options.autoloop {
            if !self.end_of_stream {
                log::info!("[HoloPlayer {}] Segment {} ended, end of stream", self.id, segment);
                self.end_of_stream = true;
                self.emit(PlayerEvent::EndOfStream);
            }
            return;
        }

        session.current_segment = (session.current_segment + 1) % count;
        let next = session.current_segment;
        session
            .sync
            .set_layout(watermark_layout(&self.config, &session.layout.timeline[next]));
        log::info!("[HoloPlayer {}] Segment {} ended, now on segment {}", self.id, segment, next);
        session.videos.load_next();
        self.start_playback_if_ready();
    }

    /// Resume a video we paused for buffering once it has data again.
    fn resume_stalled(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let segment = session.current_segment;
        let Some(status) = session.videos.status(segment) else {
            return;
        };
        let ready = session.videos.decoder(segment).map(|d| d.ready_state());

        if !self.need_mesh_data
            && self.suspended
            && status.playing
            && ready == Some(ReadyState::HaveEnoughData)
        {
            log::info!("[HoloPlayer {}] Resuming stalled segment {}", self.id, segment);
            match session.videos.play(segment) {
                Ok(()) => self.suspended = false,
                Err(e) => log::info!("[HoloPlayer {}] Resume prevented: {}", self.id, e),
            }
        }
    }

    fn synchronize(&mut self, now: Instant) -> PlayerResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let segment = session.current_segment;
        let Some(status) = session.videos.status(segment) else {
            return Ok(());
        };
        if !status.playing || self.suspended {
            return Ok(());
        }

        let ready = session.videos.decoder(segment).map(|d| d.ready_state());
        if ready != Some(ReadyState::HaveEnoughData) {
            log::info!(
                "[HoloPlayer {}] Suspending segment {}, ready state {:?}",
                self.id,
                segment,
                ready
            );
            session.videos.pause(segment);
            self.suspended = true;
        }

        let interval = Duration::from_millis(self.config.min_update_interval_ms);
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) < interval {
                return Ok(());
            }
        }
        self.last_update = Some(now);

        let Some(image) = session.videos.decoder(segment).and_then(|d| d.current_image()) else {
            return Ok(());
        };
        let sample = match session.sync.sample(image) {
            Ok(Some(sample)) => sample,
            Ok(None) => return Ok(()),
            Err(e) => {
                log::warn!("[HoloPlayer {}] Watermark readback failed: {}", self.id, e);
                return Ok(());
            }
        };

        let target = sample.frame_index;
        let frames = &session.layout.frames;
        if target >= frames.len() {
            log::warn!(
                "[HoloPlayer {}] Watermark index {} outside stream of {} frames",
                self.id,
                target,
                frames.len()
            );
            return Ok(());
        }
        if self.decoder.current().is_some_and(|c| c.frame_index == target) {
            return Ok(());
        }

        if MeshDecoder::ensure_ready(&frames[target], &session.ring).is_err() {
            log::info!(
                "[HoloPlayer {}] Ran out of mesh data at frame {}, suspending segment {}",
                self.id,
                target,
                segment
            );
            session.videos.pause(segment);
            self.suspended = true;
            self.need_mesh_data = true;
            if !session.ring.is_loading() {
                session.ring.load_next();
            }
            return Ok(());
        }

        // A stall can swallow the sample that went backwards, so a cursor
        // past the target counts as a wrap too
        let wrapped = sample.wrapped || self.decoder.cursor().is_some_and(|c| c > target);
        if wrapped {
            log::info!(
                "[HoloPlayer {}] Loop detected, frame {} after {:?}",
                self.id,
                target,
                self.decoder.current().map(|c| c.frame_index)
            );
            self.decoder.rewind_to_run(&session.layout.frames, target);
            step(&mut self.decoder, session)?;
        }

        // Follow the cursor, not the shown frame: after a rewind they differ
        while self.decoder.cursor().map_or(true, |c| c < target) {
            if !step(&mut self.decoder, session)? {
                break;
            }
        }

        match self.decoder.current() {
            Some(current) if current.frame_index == target => {
                session.presentable_slot = Some(sample.slot);
            }
            current => log::debug!(
                "[HoloPlayer {}] Texture/mesh mismatch: video {}, mesh {:?}",
                self.id,
                target,
                current.map(|c| c.frame_index)
            ),
        }
        Ok(())
    }

    pub fn play(&mut self) -> PlayerResult<()> {
        match self.state {
            PlaybackState::Opening => {
                self.force_load();
                Ok(())
            }
            PlaybackState::Opened | PlaybackState::Paused => {
                self.play_current()?;
                log::info!("[HoloPlayer {}] State -> Playing", self.id);
                self.state = PlaybackState::Playing;
                Ok(())
            }
            PlaybackState::Playing => Ok(()),
            state @ (PlaybackState::Empty | PlaybackState::Closed) => {
                Err(PlayerError::InvalidState {
                    operation: "play",
                    state,
                })
            }
        }
    }

    /// Start the current segment, falling back to muted playback when the
    /// platform refuses audible autoplay.
    fn play_current(&mut self) -> Result<(), PlayError> {
        let Some(session) = self.session.as_mut() else {
            return Err(PlayError::Rejected {
                reason: "no stream is open".to_string(),
            });
        };
        let segment = session.current_segment;
        match session.videos.play(segment) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::info!("[HoloPlayer {}] Play prevented ({}), retrying muted", self.id, e);
                if let Some(decoder) = session.videos.decoder_mut(segment) {
                    decoder.set_muted(true);
                }
                session.videos.play(segment)
            }
        }
    }

    pub fn pause(&mut self) {
        if !self.state.is_opened() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.videos.pause(session.current_segment);
        }
        self.suspended = false;
        log::info!("[HoloPlayer {}] State -> Paused", self.id);
        self.state = PlaybackState::Paused;
    }

    /// Manually start the current segment while still opening.
    pub fn force_load(&mut self) {
        let Some(session) = self.session.as_mut() else {
            log::info!("[HoloPlayer {}] force_load: no manifest yet", self.id);
            return;
        };
        let segment = session.current_segment;
        match session.videos.status(segment) {
            Some(status) if status.playing => {
                log::info!("[HoloPlayer {}] force_load: segment already playing", self.id);
            }
            Some(status) if !status.preloaded => {
                log::info!("[HoloPlayer {}] force_load: manually starting segment {}", self.id, segment);
                self.suspended = true;
                match session.videos.play(segment) {
                    Ok(()) => self.state = PlaybackState::Playing,
                    Err(e) => log::info!("[HoloPlayer {}] Play prevented: {}", self.id, e),
                }
            }
            Some(_) => log::debug!("[HoloPlayer {}] force_load: segment {} already preloaded", self.id, segment),
            None => log::debug!("[HoloPlayer {}] force_load: segment {} not bound yet", self.id, segment),
        }
    }

    /// Back to the first frame. Loading restarts as right after open; the
    /// fallback frame is kept.
    pub fn rewind(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        log::info!("[HoloPlayer {}] Rewind", self.id);

        session.videos.rewind();
        session.ring.rewind();
        session.sync.reset();
        session.current_segment = 0;
        session
            .sync
            .set_layout(watermark_layout(&self.config, &session.layout.timeline[0]));
        session.presentable_slot = None;

        self.decoder.reset();
        self.state = PlaybackState::Opening;
        self.suspended = false;
        self.need_mesh_data = false;
        self.end_of_stream = false;
        self.last_update = None;

        session.ring.load_next();
        session.videos.load_next();
    }

    /// Abort all loading and release every resource. Idempotent.
    pub fn close(&mut self) {
        if self.state == PlaybackState::Closed {
            return;
        }
        if let Some((handle, _)) = self.manifest_fetch.take() {
            handle.abort();
        }
        if let Some(mut session) = self.session.take() {
            session.ring.close();
            session.videos.close();
        }
        self.decoder.reset();
        self.suspended = false;
        self.need_mesh_data = false;
        log::info!("[HoloPlayer {}] State -> Closed", self.id);
        self.state = PlaybackState::Closed;
    }

    pub fn set_audio_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.config.audio_volume = volume;
        if let Some(session) = self.session.as_mut() {
            session.videos.set_volume(volume);
        }
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.options.audio_enabled = enabled;
        if let Some(session) = self.session.as_mut() {
            session.videos.set_options(self.options);
            if let Some(decoder) = session.videos.decoder_mut(session.current_segment) {
                decoder.set_muted(!enabled);
            }
        }
    }

    /// Looping is only applied to the decoder for single-segment timelines;
    /// longer timelines loop by wrapping the segment index.
    pub fn set_auto_looping(&mut self, looping: bool) {
        self.options.autoloop = looping;
        if let Some(session) = self.session.as_mut() {
            session.videos.set_options(self.options);
            if session.layout.timeline.len() == 1 {
                if let Some(decoder) = session.videos.decoder_mut(0) {
                    decoder.set_loop(looping);
                }
            }
        }
    }

    /// Host visibility changed (app backgrounded or foregrounded).
    pub fn set_visible(&mut self, visible: bool) {
        if !visible {
            self.was_playing = self.state == PlaybackState::Playing;
            log::info!("[HoloPlayer {}] Hidden, pausing playback", self.id);
            self.pause();
        } else if self.was_playing {
            self.was_playing = false;
            log::info!("[HoloPlayer {}] Visible, resuming playback", self.id);
            if let Err(e) = self.play() {
                log::info!("[HoloPlayer {}] Resume failed: {}", self.id, e);
            }
        }
    }

    /// Opening progress in `[0, 1]`.
    pub fn load_progress(&self) -> f32 {
        let Some(session) = self.session.as_ref() else {
            return 0.0;
        };
        if self.state.is_opened() {
            return 1.0;
        }
        let needed = session.min_buffers + session.min_videos;
        if needed == 0 {
            return 1.0;
        }
        let have = session.ring.buffers_loaded().min(session.min_buffers)
            + session.videos.videos_loaded().min(session.min_videos);
        have as f32 / needed as f32
    }

    pub fn current_frame(&self) -> Option<CurrentFrame<'_>> {
        if let Some(frame) = self.decoder.current() {
            return Some(CurrentFrame::Decoded(frame));
        }
        match &self.session.as_ref()?.fallback {
            FallbackState::Ready(frame) => Some(CurrentFrame::Fallback(frame)),
            _ => None,
        }
    }

    pub fn current_frame_info(&self) -> Option<FrameInfo> {
        Some(match self.current_frame()? {
            CurrentFrame::Decoded(frame) => FrameInfo {
                frame_index: Some(frame.frame_index),
                primitive_count: frame.index_count(),
                bounds: frame.bounds,
            },
            CurrentFrame::Fallback(frame) => FrameInfo {
                frame_index: None,
                primitive_count: frame.index_count(),
                bounds: frame.bounds,
            },
        })
    }
}

/// Decode the next frame and move the buffer pin onto it. `Ok(false)` when
/// its bytes are not resident yet.
fn step(decoder: &mut MeshDecoder, session: &mut Session) -> Result<bool, DecodeError> {
    match decoder.advance(&session.layout.frames, &session.ring) {
        Ok(frame) => {
            let buffer = session.layout.frames[frame.frame_index].primary_buffer();
            session.ring.advance_current(buffer);
            Ok(true)
        }
        Err(e) if e.is_transient() => {
            log::debug!("[HoloPlayer] {}", e);
            Ok(false)
        }
        Err(e) => {
            log::error!("[HoloPlayer] Fatal decode error: {}", e);
            Err(e)
        }
    }
}

impl Drop for HoloPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{FileFetcher, VideoDecoder, VideoEvent, VideoImage};

    struct IdleDecoder;

    impl VideoDecoder for IdleDecoder {
        fn load(&mut self, _url: &str) {}
        fn play(&mut self) -> Result<(), PlayError> {
            Ok(())
        }
        fn pause(&mut self) {}
        fn rewind(&mut self) {}
        fn set_muted(&mut self, _muted: bool) {}
        fn set_volume(&mut self, _volume: f32) {}
        fn set_loop(&mut self, _looping: bool) {}
        fn ready_state(&self) -> ReadyState {
            ReadyState::HaveNothing
        }
        fn current_image(&self) -> Option<VideoImage<'_>> {
            None
        }
        fn poll_events(&mut self) -> Vec<VideoEvent> {
            Vec::new()
        }
        fn unload(&mut self) {}
    }

    struct IdleBackend;

    impl VideoBackend for IdleBackend {
        fn create_decoder(&mut self) -> Box<dyn VideoDecoder> {
            Box::new(IdleDecoder)
        }
    }

    fn player() -> HoloPlayer {
        let config = PlayerConfig {
            decode_backend: DecodeBackendKind::Scalar,
            ..PlayerConfig::default()
        };
        HoloPlayer::new(config, Arc::new(FileFetcher), Box::new(IdleBackend)).unwrap()
    }

    #[test]
    fn test_play_requires_a_stream() {
        let mut player = player();
        assert_eq!(player.state(), PlaybackState::Empty);
        assert!(matches!(
            player.play(),
            Err(PlayerError::InvalidState { operation: "play", state: PlaybackState::Empty })
        ));
        assert_eq!(player.load_progress(), 0.0);
        assert!(player.current_frame().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut player = player();
        player.close();
        assert_eq!(player.state(), PlaybackState::Closed);
        player.close();
        assert_eq!(player.state(), PlaybackState::Closed);
        assert!(!player.tick().unwrap());
    }

    #[test]
    fn test_missing_manifest_closes_player() {
        let mut player = player();
        player.open("/nonexistent/holovideo/stream.gltf", OpenOptions::default());
        assert_eq!(player.state(), PlaybackState::Opening);

        let err = player.tick().unwrap_err();
        assert!(matches!(err, PlayerError::Fetch(_)));
        assert_eq!(player.state(), PlaybackState::Closed);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PlayerConfig {
            readback_depth: 1,
            ..PlayerConfig::default()
        };
        let result = HoloPlayer::new(config, Arc::new(FileFetcher), Box::new(IdleBackend));
        assert!(matches!(result, Err(PlayerError::Config(_))));
    }

    #[test]
    fn test_instances_get_distinct_ids() {
        let a = player();
        let b = player();
        assert_ne!(a.id(), b.id());
    }
}
