//! Video Segment Pool
//!
//! A small fixed set of platform video decoders, each bound to at most one
//! timeline segment. Segments are bound round-robin ahead of playback and
//! pre-rolled (started then paused once) so the next segment is ready to
//! show the moment the current one ends.

use std::collections::VecDeque;

use crate::config::{OpenOptions, PreloadStrategy, VideoFormat};
use crate::manifest::Segment;

/// Decoder readiness, mirroring the media element ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VideoEvent {
    /// First frame is decodable
    LoadedData,
    /// Playback actually started
    Playing,
    Ended,
    Error(String),
}

/// Borrowed RGBA8 view of the image currently on screen.
#[derive(Debug, Clone, Copy)]
pub struct VideoImage<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayError {
    /// Autoplay policy declined the request
    #[error("playback was prevented: {reason}")]
    Rejected { reason: String },
}

/// Platform video decoder.
pub trait VideoDecoder {
    fn load(&mut self, url: &str);
    fn play(&mut self) -> Result<(), PlayError>;
    fn pause(&mut self);
    /// Seek back to the start of the segment
    fn rewind(&mut self);
    fn set_muted(&mut self, muted: bool);
    fn set_volume(&mut self, volume: f32);
    fn set_loop(&mut self, looping: bool);
    fn ready_state(&self) -> ReadyState;
    fn current_image(&self) -> Option<VideoImage<'_>>;
    /// Drain events raised since the last call
    fn poll_events(&mut self) -> Vec<VideoEvent>;
    /// Drop the source and release decoder resources
    fn unload(&mut self);
}

/// Creates decoders for the pool.
pub trait VideoBackend {
    fn create_decoder(&mut self) -> Box<dyn VideoDecoder>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Preloaded { segment: usize },
    Ended { segment: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loading,
    /// Play requested to force buffering; pause on the first `Playing`
    Priming,
    Ready,
}

struct VideoSlot {
    decoder: Box<dyn VideoDecoder>,
    segment: Option<usize>,
    phase: Phase,
    playing: bool,
    paused: bool,
}

/// Playback status of a bound segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStatus {
    pub preloaded: bool,
    pub playing: bool,
    pub paused: bool,
}

pub struct VideoPool {
    slots: Vec<VideoSlot>,
    free: VecDeque<usize>,
    timeline: Vec<Segment>,
    url_root: String,

    options: OpenOptions,
    strategy: PreloadStrategy,
    formats: Vec<VideoFormat>,
    volume: f32,

    next_load: usize,
    videos_loaded: usize,
    /// Events raised outside `poll`, reported by the next one
    queued: Vec<PoolEvent>,
}

impl VideoPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: &mut dyn VideoBackend,
        size: usize,
        timeline: Vec<Segment>,
        url_root: impl Into<String>,
        options: OpenOptions,
        strategy: PreloadStrategy,
        formats: Vec<VideoFormat>,
        volume: f32,
    ) -> Self {
        let size = size.min(timeline.len()).max(1);
        let slots: Vec<VideoSlot> = (0..size)
            .map(|_| {
                let mut decoder = backend.create_decoder();
                decoder.set_volume(volume);
                VideoSlot {
                    decoder,
                    segment: None,
                    phase: Phase::Loading,
                    playing: false,
                    paused: true,
                }
            })
            .collect();
        log::debug!("[VideoPool] {} decoders for {} segments", slots.len(), timeline.len());
        let free = (0..slots.len()).collect();
        Self {
            slots,
            free,
            timeline,
            url_root: url_root.into(),
            options,
            strategy,
            formats,
            volume,
            next_load: 0,
            videos_loaded: 0,
            queued: Vec::new(),
        }
    }

    pub fn videos_loaded(&self) -> usize {
        self.videos_loaded
    }

    pub fn segment_count(&self) -> usize {
        self.timeline.len()
    }

    pub fn options(&self) -> OpenOptions {
        self.options
    }

    pub fn set_options(&mut self, options: OpenOptions) {
        self.options = options;
    }

    /// Pick the source URI for a segment from the preferred formats.
    pub fn select_source(&self, segment: usize) -> Option<String> {
        let seg = self.timeline.get(segment)?;
        let uri = self
            .formats
            .iter()
            .find_map(|format| match format {
                VideoFormat::Hls => seg.hls_uri.as_deref(),
                VideoFormat::Dash => seg.dash_uri.as_deref(),
                VideoFormat::Mp4 => Some(seg.uri.as_str()),
            })
            .unwrap_or(seg.uri.as_str());
        Some(format!("{}{}", self.url_root, uri))
    }

    /// Bind the next segment to a free decoder and start pre-rolling it.
    /// Returns whether a segment was bound.
    pub fn load_next(&mut self) -> bool {
        if self.timeline.is_empty() {
            return false;
        }
        if self.free.is_empty() {
            return false;
        }
        let segment = self.next_load;
        if self.slot_index(segment).is_some() {
            log::debug!("[VideoPool] Segment {} is still bound", segment);
            return false;
        }
        let Some(index) = self.free.pop_front() else {
            return false;
        };
        self.next_load = (self.next_load + 1) % self.timeline.len();
        let Some(url) = self.select_source(segment) else {
            self.free.push_front(index);
            return false;
        };

        let looping = self.timeline.len() == 1 && self.options.autoloop;
        let muted = self.options.autoplay || !self.options.audio_enabled;

        let slot = &mut self.slots[index];
        slot.segment = Some(segment);
        slot.phase = Phase::Loading;
        slot.playing = false;
        slot.paused = true;
        slot.decoder.set_muted(muted);
        slot.decoder.set_loop(looping);
        slot.decoder.set_volume(self.volume);
        log::info!("[VideoPool] Loading segment {} from {} into decoder {}", segment, url, index);
        slot.decoder.load(&url);

        if self.strategy == PreloadStrategy::ForcedPlay {
            if let Some(event) = self.prime(index) {
                self.queued.push(event);
            }
        }
        true
    }

    /// Start playback to force buffering. A rejected play still counts as
    /// primed: the decoder has data, it just may not start by itself.
    fn prime(&mut self, index: usize) -> Option<PoolEvent> {
        let slot = &mut self.slots[index];
        slot.phase = Phase::Priming;
        match slot.decoder.play() {
            Ok(()) => None,
            Err(e) => {
                log::info!("[VideoPool] Preload play rejected ({}), treating as loaded", e);
                self.finish_preload(index)
            }
        }
    }

    fn finish_preload(&mut self, index: usize) -> Option<PoolEvent> {
        let slot = &mut self.slots[index];
        if slot.phase == Phase::Ready {
            return None;
        }
        slot.decoder.pause();
        slot.decoder.set_muted(self.options.autoplay || !self.options.audio_enabled);
        slot.phase = Phase::Ready;
        slot.paused = true;
        let segment = slot.segment?;
        self.videos_loaded += 1;
        log::info!("[VideoPool] Segment {} preloaded", segment);
        Some(PoolEvent::Preloaded { segment })
    }

    /// Drain decoder events. Preloading a segment chains the next load;
    /// an ended segment returns its decoder to the free list.
    pub fn poll(&mut self) -> Vec<PoolEvent> {
        let mut out = std::mem::take(&mut self.queued);
        if !out.is_empty() {
            self.load_next();
        }
        for index in 0..self.slots.len() {
            let Some(segment) = self.slots[index].segment else {
                continue;
            };
            for event in self.slots[index].decoder.poll_events() {
                match event {
                    VideoEvent::LoadedData => {
                        if self.slots[index].phase != Phase::Loading {
                            continue;
                        }
                        let ready = match self.strategy {
                            PreloadStrategy::PlayOnLoadedData => self.prime(index),
                            PreloadStrategy::PassiveReady => self.finish_preload(index),
                            PreloadStrategy::ForcedPlay => None,
                        };
                        if let Some(e) = ready {
                            out.push(e);
                            self.load_next();
                        }
                    }
                    VideoEvent::Playing => {
                        if self.slots[index].phase == Phase::Priming {
                            if let Some(e) = self.finish_preload(index) {
                                out.push(e);
                                self.load_next();
                            }
                        } else {
                            log::debug!("[VideoPool] Segment {} playing", segment);
                            self.slots[index].playing = true;
                        }
                    }
                    VideoEvent::Ended => {
                        log::info!("[VideoPool] Segment {} ended", segment);
                        let slot = &mut self.slots[index];
                        slot.playing = false;
                        slot.paused = true;
                        slot.segment = None;
                        self.free.push_back(index);
                        out.push(PoolEvent::Ended { segment });
                        break;
                    }
                    VideoEvent::Error(message) => {
                        log::warn!("[VideoPool] Segment {} error: {}", segment, message);
                    }
                }
            }
        }
        out
    }

    fn slot_index(&self, segment: usize) -> Option<usize> {
        self.slots.iter().position(|s| s.segment == Some(segment))
    }

    pub fn status(&self, segment: usize) -> Option<SegmentStatus> {
        let slot = &self.slots[self.slot_index(segment)?];
        Some(SegmentStatus {
            preloaded: slot.phase == Phase::Ready,
            playing: slot.playing,
            paused: slot.paused,
        })
    }

    pub fn decoder(&self, segment: usize) -> Option<&dyn VideoDecoder> {
        let index = self.slot_index(segment)?;
        Some(self.slots[index].decoder.as_ref())
    }

    pub fn decoder_mut(&mut self, segment: usize) -> Option<&mut (dyn VideoDecoder + 'static)> {
        let index = self.slot_index(segment)?;
        Some(self.slots[index].decoder.as_mut())
    }

    pub fn play(&mut self, segment: usize) -> Result<(), PlayError> {
        let Some(index) = self.slot_index(segment) else {
            return Err(PlayError::Rejected {
                reason: format!("segment {} is not loaded", segment),
            });
        };
        let slot = &mut self.slots[index];
        slot.decoder.play()?;
        slot.paused = false;
        Ok(())
    }

    pub fn pause(&mut self, segment: usize) {
        if let Some(index) = self.slot_index(segment) {
            let slot = &mut self.slots[index];
            slot.decoder.pause();
            slot.paused = true;
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        for slot in &mut self.slots {
            slot.decoder.set_volume(volume);
        }
    }

    /// Unbind every segment and start over from the first one.
    pub fn rewind(&mut self) {
        for slot in &mut self.slots {
            if slot.segment.take().is_some() {
                slot.decoder.pause();
                slot.decoder.rewind();
            }
            slot.phase = Phase::Loading;
            slot.playing = false;
            slot.paused = true;
        }
        self.free = (0..self.slots.len()).collect();
        self.next_load = 0;
        self.videos_loaded = 0;
        self.queued.clear();
    }

    pub fn close(&mut self) {
        for slot in &mut self.slots {
            slot.decoder.pause();
            slot.decoder.unload();
            slot.segment = None;
            slot.playing = false;
            slot.paused = true;
        }
        self.free = (0..self.slots.len()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
    }

    struct FakeDecoder {
        log: Rc<RefCell<Log>>,
        events: Vec<VideoEvent>,
        reject_play: bool,
    }

    impl VideoDecoder for FakeDecoder {
        fn load(&mut self, url: &str) {
            self.log.borrow_mut().calls.push(format!("load {}", url));
            self.events.push(VideoEvent::LoadedData);
        }
        fn play(&mut self) -> Result<(), PlayError> {
            if self.reject_play {
                return Err(PlayError::Rejected {
                    reason: "policy".into(),
                });
            }
            self.events.push(VideoEvent::Playing);
            Ok(())
        }
        fn pause(&mut self) {}
        fn rewind(&mut self) {}
        fn set_muted(&mut self, _muted: bool) {}
        fn set_volume(&mut self, _volume: f32) {}
        fn set_loop(&mut self, looping: bool) {
            self.log.borrow_mut().calls.push(format!("loop {}", looping));
        }
        fn ready_state(&self) -> ReadyState {
            ReadyState::HaveEnoughData
        }
        fn current_image(&self) -> Option<VideoImage<'_>> {
            None
        }
        fn poll_events(&mut self) -> Vec<VideoEvent> {
            std::mem::take(&mut self.events)
        }
        fn unload(&mut self) {}
    }

    struct FakeBackend {
        log: Rc<RefCell<Log>>,
        reject_play: bool,
    }

    impl VideoBackend for FakeBackend {
        fn create_decoder(&mut self) -> Box<dyn VideoDecoder> {
            Box::new(FakeDecoder {
                log: self.log.clone(),
                events: Vec::new(),
                reject_play: self.reject_play,
            })
        }
    }

    fn segment(name: &str) -> Segment {
        Segment {
            uri: format!("{}.mp4", name),
            hls_uri: Some(format!("{}.m3u8", name)),
            dash_uri: None,
            width: 64,
            height: 64,
            block_size: 2,
        }
    }

    fn pool(segments: usize, options: OpenOptions, reject_play: bool) -> (Rc<RefCell<Log>>, VideoPool) {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut backend = FakeBackend {
            log: log.clone(),
            reject_play,
        };
        let timeline = (0..segments).map(|i| segment(&format!("s{}", i))).collect();
        let pool = VideoPool::new(
            &mut backend,
            2,
            timeline,
            "http://host/",
            options,
            PreloadStrategy::PlayOnLoadedData,
            vec![VideoFormat::Mp4],
            1.0,
        );
        (log, pool)
    }

    #[test]
    fn test_preload_chain() {
        let (log, mut pool) = pool(3, OpenOptions::default(), false);
        assert!(pool.load_next());

        // LoadedData -> play, Playing -> pause + preloaded + chain next
        assert!(pool.poll().is_empty());
        assert_eq!(pool.poll(), vec![PoolEvent::Preloaded { segment: 0 }]);
        assert_eq!(pool.poll(), vec![PoolEvent::Preloaded { segment: 1 }]);
        assert_eq!(pool.videos_loaded(), 2);

        // Both decoders bound; segment 2 waits for a free one
        assert!(!pool.load_next());
        assert!(log.borrow().calls.contains(&"load http://host/s1.mp4".to_string()));
        assert_eq!(pool.status(0).map(|s| s.preloaded), Some(true));
    }

    #[test]
    fn test_rejected_play_counts_as_preloaded() {
        let (_log, mut pool) = pool(1, OpenOptions::default(), true);
        pool.load_next();
        assert_eq!(pool.poll(), vec![PoolEvent::Preloaded { segment: 0 }]);
    }

    #[test]
    fn test_loop_only_for_single_segment() {
        let looping = OpenOptions {
            autoloop: true,
            ..OpenOptions::default()
        };
        let (log, mut single) = pool(1, looping, false);
        single.load_next();
        assert!(log.borrow().calls.contains(&"loop true".to_string()));

        let (log, mut multi) = pool(2, looping, false);
        multi.load_next();
        assert!(log.borrow().calls.contains(&"loop false".to_string()));
    }

    #[test]
    fn test_source_selection() {
        let (_log, mut pool) = pool(1, OpenOptions::default(), false);
        pool.formats = vec![VideoFormat::Dash, VideoFormat::Hls, VideoFormat::Mp4];
        assert_eq!(pool.select_source(0).as_deref(), Some("http://host/s0.m3u8"));
        pool.formats = vec![VideoFormat::Dash];
        assert_eq!(pool.select_source(0).as_deref(), Some("http://host/s0.mp4"));
    }
}
