//! Shared fixtures: an in-memory fetcher, a scripted video decoder that
//! paints the frame-index watermark, and a synthetic stream builder.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::{Arc, Mutex};

use glam::Vec3;
use holovideo::config::{DecodeBackendKind, PlayerConfig, WatermarkLayoutKind};
use holovideo::mesh::FrameBytes;
use holovideo::streaming::{
    FetchError, FetchHandle, FetchResult, Fetcher, PlayError, ReadyState, VideoBackend,
    VideoDecoder, VideoEvent, VideoImage,
};
use holovideo::{HoloPlayer, StreamLayout, WatermarkLayout};
use serde_json::{json, Value};

pub const VERTICES: usize = 3;
pub const VIDEO_WIDTH: u32 = 64;
pub const VIDEO_HEIGHT: u32 = 2;
pub const BLOCK_SIZE: u32 = 2;
pub const ROOT: &str = "mem://stream/";
pub const MANIFEST_URL: &str = "mem://stream/stream.gltf";

const DELTA_RANGE: f32 = 0.01;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fetcher over an in-memory file table. Held URLs stay pending until
/// released.
#[derive(Default)]
pub struct MemoryFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    holding: Mutex<HashSet<String>>,
    held: Mutex<Vec<(String, flume::Sender<FetchResult>)>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(url.into(), bytes);
    }

    pub fn hold(&self, url: &str) {
        self.holding.lock().unwrap().insert(url.to_string());
    }

    /// Complete every pending request for `url` and stop holding it.
    pub fn release(&self, url: &str) {
        self.holding.lock().unwrap().remove(url);
        let mut held = self.held.lock().unwrap();
        let (ready, pending): (Vec<_>, Vec<_>) = held.drain(..).partition(|(u, _)| u == url);
        *held = pending;
        for (u, tx) in ready {
            let _ = tx.send(self.result(&u));
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn result(&self, url: &str) -> FetchResult {
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> FetchHandle {
        self.requests.lock().unwrap().push(url.to_string());
        if self.holding.lock().unwrap().contains(url) {
            let (tx, rx) = flume::bounded(1);
            self.held.lock().unwrap().push((url.to_string(), tx));
            return FetchHandle::new(url, rx);
        }
        FetchHandle::ready(url, self.result(url))
    }
}

/// Video backend whose decoders step one frame per poll and paint each
/// frame's mesh index as a watermark.
pub struct ScriptedVideos {
    segments: Arc<Vec<(String, Range<usize>)>>,
    layout: WatermarkLayout,
    /// Refuse `play()` unless muted, like a browser autoplay policy
    pub reject_audible: bool,
}

impl ScriptedVideos {
    pub fn new(stream: &Stream) -> Self {
        Self {
            segments: Arc::new(stream.segments.clone()),
            layout: WatermarkLayout::new(WatermarkLayoutKind::Strip, BLOCK_SIZE),
            reject_audible: false,
        }
    }
}

impl VideoBackend for ScriptedVideos {
    fn create_decoder(&mut self) -> Box<dyn VideoDecoder> {
        Box::new(ScriptedDecoder {
            segments: self.segments.clone(),
            layout: self.layout,
            reject_audible: self.reject_audible,
            frames: 0..0,
            frame: 0,
            loaded: false,
            playing: false,
            advancing: false,
            looping: false,
            muted: false,
            image: Vec::new(),
            events: Vec::new(),
        })
    }
}

pub struct ScriptedDecoder {
    segments: Arc<Vec<(String, Range<usize>)>>,
    layout: WatermarkLayout,
    reject_audible: bool,
    frames: Range<usize>,
    frame: usize,
    loaded: bool,
    playing: bool,
    /// Set on the first poll after play so that poll does not skip a frame
    advancing: bool,
    looping: bool,
    muted: bool,
    image: Vec<u8>,
    events: Vec<VideoEvent>,
}

impl ScriptedDecoder {
    fn redraw(&mut self) {
        self.image = self.layout.encode(self.frame as u16, VIDEO_WIDTH, VIDEO_HEIGHT);
    }
}

impl VideoDecoder for ScriptedDecoder {
    fn load(&mut self, url: &str) {
        match self.segments.iter().find(|(uri, _)| url.ends_with(uri.as_str())) {
            Some((_, frames)) => {
                self.frames = frames.clone();
                self.frame = frames.start;
                self.loaded = true;
                self.playing = false;
                self.advancing = false;
                self.redraw();
                self.events.push(VideoEvent::LoadedData);
            }
            None => self.events.push(VideoEvent::Error(format!("no such video {}", url))),
        }
    }

    fn play(&mut self) -> Result<(), PlayError> {
        if !self.loaded {
            return Err(PlayError::Rejected {
                reason: "nothing loaded".to_string(),
            });
        }
        if self.reject_audible && !self.muted {
            return Err(PlayError::Rejected {
                reason: "audible playback blocked".to_string(),
            });
        }
        self.playing = true;
        self.events.push(VideoEvent::Playing);
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
        self.advancing = false;
    }

    fn rewind(&mut self) {
        self.frame = self.frames.start;
        self.advancing = false;
        if self.loaded {
            self.redraw();
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn ready_state(&self) -> ReadyState {
        if self.loaded {
            ReadyState::HaveEnoughData
        } else {
            ReadyState::HaveNothing
        }
    }

    fn current_image(&self) -> Option<VideoImage<'_>> {
        self.loaded.then(|| VideoImage {
            width: VIDEO_WIDTH,
            height: VIDEO_HEIGHT,
            pixels: &self.image,
        })
    }

    fn poll_events(&mut self) -> Vec<VideoEvent> {
        if self.playing {
            if self.advancing {
                self.frame += 1;
                if self.frame >= self.frames.end {
                    if self.looping {
                        self.frame = self.frames.start;
                    } else {
                        self.frame = self.frames.end - 1;
                        self.playing = false;
                        self.advancing = false;
                        self.events.push(VideoEvent::Ended);
                    }
                }
                self.redraw();
            } else {
                self.advancing = true;
            }
        }
        std::mem::take(&mut self.events)
    }

    fn unload(&mut self) {
        self.loaded = false;
        self.playing = false;
        self.advancing = false;
        self.events.clear();
    }
}

/// Buffers held in memory, indexed by descriptor.
pub struct ResidentBuffers(pub HashMap<usize, Vec<u8>>);

impl FrameBytes for ResidentBuffers {
    fn buffer_bytes(&self, buffer: usize) -> Option<&[u8]> {
        self.0.get(&buffer).map(Vec::as_slice)
    }
}

/// A synthetic stream: manifest, buffers and the frame range of each
/// video segment.
pub struct Stream {
    pub manifest: Value,
    /// (uri, bytes); index 0 is the fallback buffer
    pub buffers: Vec<(String, Vec<u8>)>,
    pub segments: Vec<(String, Range<usize>)>,
    pub frame_count: usize,
    pub keyframe_interval: usize,
}

impl Stream {
    pub fn layout(&self) -> StreamLayout {
        StreamLayout::from_slice(self.manifest.to_string().as_bytes()).unwrap()
    }

    pub fn resident(&self) -> ResidentBuffers {
        ResidentBuffers(
            self.buffers
                .iter()
                .enumerate()
                .map(|(i, (_, bytes))| (i, bytes.clone()))
                .collect(),
        )
    }

    pub fn buffer_url(&self, descriptor: usize) -> String {
        format!("{}{}", ROOT, self.buffers[descriptor].0)
    }

    /// Publish the manifest and every buffer on `fetcher`.
    pub fn install(&self, fetcher: &MemoryFetcher) {
        fetcher.insert(MANIFEST_URL, self.manifest.to_string().into_bytes());
        for (uri, bytes) in &self.buffers {
            fetcher.insert(format!("{}{}", ROOT, uri), bytes.clone());
        }
    }

    /// Positions of `frame`, computed straight from the quantized data.
    pub fn expected_positions(&self, frame: usize) -> Vec<Vec3> {
        let start = frame - frame % self.keyframe_interval;
        let mut history: Vec<Vec<Vec3>> = Vec::new();
        for i in start..=frame {
            let next: Vec<Vec3> = if i == start {
                (0..VERTICES)
                    .map(|v| {
                        let q = position_q(i, v);
                        Vec3::new(q[0] as f32, q[1] as f32, q[2] as f32) * (2.0 / 65535.0) - Vec3::ONE
                    })
                    .collect()
            } else {
                let prev = &history[history.len() - 1];
                let pp = (history.len() >= 2).then(|| &history[history.len() - 2]);
                (0..VERTICES)
                    .map(|v| {
                        let q = delta_q(i, v);
                        let d = Vec3::new(q[0] as f32, q[1] as f32, q[2] as f32)
                            * (2.0 * DELTA_RANGE / 255.0)
                            - Vec3::splat(DELTA_RANGE);
                        let predicted = match pp {
                            Some(pp) => prev[v] + (prev[v] - pp[v]),
                            None => prev[v],
                        };
                        predicted + d
                    })
                    .collect()
            };
            history.push(next);
        }
        history.pop().unwrap_or_default()
    }
}

fn position_q(frame: usize, vertex: usize) -> [u16; 3] {
    [0, 1, 2].map(|c| ((frame * 1000 + vertex * 7919 + c * 20011) % 65536) as u16)
}

fn delta_q(frame: usize, vertex: usize) -> [u8; 3] {
    [0, 1, 2].map(|c| ((frame * 37 + vertex * 11 + c * 5) % 256) as u8)
}

fn push_u16s(out: &mut Vec<u8>, values: impl IntoIterator<Item = u16>) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub struct StreamBuilder {
    segment_frames: Vec<usize>,
    frames_per_buffer: usize,
    keyframe_interval: usize,
    fallback: bool,
}

impl StreamBuilder {
    pub fn new(segment_frames: &[usize]) -> Self {
        Self {
            segment_frames: segment_frames.to_vec(),
            frames_per_buffer: 4,
            keyframe_interval: 4,
            fallback: true,
        }
    }

    pub fn frames_per_buffer(mut self, frames: usize) -> Self {
        self.frames_per_buffer = frames;
        self
    }

    pub fn keyframe_interval(mut self, frames: usize) -> Self {
        self.keyframe_interval = frames;
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback = false;
        self
    }

    pub fn build(&self) -> Stream {
        let frame_count: usize = self.segment_frames.iter().sum();
        let stream_buffers = frame_count.div_ceil(self.frames_per_buffer);

        let mut accessors: Vec<Value> = Vec::new();
        let mut accessor = |view: usize, offset: usize, component: u32, count: usize, ty: &str, range: Option<f32>| {
            let mut value = json!({
                "bufferView": view, "byteOffset": offset, "componentType": component,
                "count": count, "type": ty
            });
            if let Some(r) = range {
                value["extensions"] = json!({ "HCAP_holovideo": {
                    "decodeMin": [-r, -r, -r], "decodeMax": [r, r, r]
                } });
            }
            accessors.push(value);
            accessors.len() - 1
        };

        // Buffer 0: float positions, uvs and indices of the still frame
        let mut fallback = Vec::new();
        let mut fallback_prim = json!({});
        if self.fallback {
            for v in 0..VERTICES {
                for c in 0..3 {
                    fallback.extend_from_slice(&((v * 3 + c) as f32 * 0.1).to_le_bytes());
                }
            }
            push_u16s(&mut fallback, std::iter::repeat(0).take(VERTICES * 2));
            push_u16s(&mut fallback, 0..VERTICES as u16);
            let pos = accessor(0, 0, 5126, VERTICES, "VEC3", None);
            let uv = accessor(0, VERTICES * 12, 5123, VERTICES, "VEC2", None);
            let idx = accessor(0, VERTICES * 16, 5123, VERTICES, "SCALAR", None);
            fallback_prim = json!({ "attributes": { "POSITION": pos, "TEXCOORD_0": uv }, "indices": idx });
        } else {
            fallback.extend_from_slice(&[0u8; 4]);
        }

        let mut buffers = vec![("fallback.bin".to_string(), fallback)];
        buffers.extend((0..stream_buffers).map(|b| (format!("stream{}.bin", b), Vec::new())));

        let mut meshes = Vec::new();
        for frame in 0..frame_count {
            let descriptor = 1 + frame / self.frames_per_buffer;
            let view = descriptor;
            let bytes = &mut buffers[descriptor].1;
            let offset = bytes.len();

            let stream_prim = if frame % self.keyframe_interval == 0 {
                push_u16s(bytes, (0..VERTICES).flat_map(|v| position_q(frame, v)));
                push_u16s(bytes, std::iter::repeat(0).take(VERTICES * 2));
                push_u16s(bytes, 0..VERTICES as u16);
                let pos = accessor(view, offset, 5123, VERTICES, "VEC3", Some(1.0));
                let uv = accessor(view, offset + VERTICES * 6, 5123, VERTICES, "VEC2", None);
                let idx = accessor(view, offset + VERTICES * 10, 5123, VERTICES, "SCALAR", None);
                json!({ "attributes": { "POSITION": pos, "TEXCOORD_0": uv }, "indices": idx })
            } else {
                bytes.extend((0..VERTICES).flat_map(|v| delta_q(frame, v)));
                let delta = accessor(view, offset, 5121, VERTICES, "VEC3", Some(DELTA_RANGE));
                json!({ "attributes": { "_DELTA": delta } })
            };

            let mut primitive = if frame == 0 { fallback_prim.clone() } else { json!({}) };
            primitive["extensions"] = json!({ "HCAP_holovideo": stream_prim });
            meshes.push(json!({ "primitives": [primitive] }));
        }

        let buffer_views: Vec<Value> = buffers
            .iter()
            .enumerate()
            .map(|(i, (_, bytes))| json!({ "buffer": i, "byteOffset": 0, "byteLength": bytes.len() }))
            .collect();
        let buffer_defs: Vec<Value> = buffers
            .iter()
            .map(|(uri, bytes)| json!({ "uri": uri, "byteLength": bytes.len() }))
            .collect();

        let mut segments = Vec::new();
        let mut images = Vec::new();
        let mut start = 0;
        for (i, &count) in self.segment_frames.iter().enumerate() {
            let uri = format!("segment{}.mp4", i);
            images.push(json!({ "uri": uri, "extensions": { "HCAP_holovideo": {
                "width": VIDEO_WIDTH, "height": VIDEO_HEIGHT, "blockSize": BLOCK_SIZE
            } } }));
            segments.push((uri, start..start + count));
            start += count;
        }
        let timeline: Vec<Value> = (0..segments.len()).map(|i| json!({ "image": i })).collect();

        let manifest = json!({
            "buffers": buffer_defs,
            "bufferViews": buffer_views,
            "accessors": accessors,
            "meshes": meshes,
            "images": images,
            "extensions": { "HCAP_holovideo": {
                "timeline": timeline,
                "maxVertexCount": VERTICES,
                "maxIndexCount": VERTICES,
                "boundingMin": [-1.0, -1.0, -1.0],
                "boundingMax": [1.0, 1.0, 1.0]
            } }
        });

        Stream {
            manifest,
            buffers,
            segments,
            frame_count,
            keyframe_interval: self.keyframe_interval,
        }
    }
}

/// Config for deterministic tests: no update throttling, scalar decode.
pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        min_update_interval_ms: 0,
        decode_backend: DecodeBackendKind::Scalar,
        ..PlayerConfig::default()
    }
}

pub fn player(stream: &Stream, fetcher: &Arc<MemoryFetcher>, config: PlayerConfig) -> HoloPlayer {
    init_logging();
    stream.install(fetcher);
    HoloPlayer::new(config, fetcher.clone(), Box::new(ScriptedVideos::new(stream))).unwrap()
}

/// Tick until `done` holds, at most `limit` times. Returns the ticks used.
pub fn tick_until(player: &mut HoloPlayer, limit: usize, mut done: impl FnMut(&HoloPlayer) -> bool) -> usize {
    for n in 0..limit {
        if done(player) {
            return n;
        }
        player.tick().unwrap();
    }
    assert!(done(player), "condition not reached in {} ticks", limit);
    limit
}
