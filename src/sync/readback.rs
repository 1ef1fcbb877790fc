//! Pipelined pixel readback.
//!
//! Each tick the synchronizer submits the on-screen image into one slot and
//! polls an older slot for its pixels. Polling never blocks: a slot whose
//! transfer has not completed reports [`ReadbackStatus::Pending`].

use std::sync::Arc;

use crate::constants::gpu_limits::COPY_ROW_ALIGNMENT;
use crate::constants::watermark::BYTES_PER_PIXEL;
use crate::mesh::ComputeError;
use crate::streaming::VideoImage;

#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error("video image {width}x{height} is smaller than the {region_width}x{region_height} watermark region")]
    ImageTooSmall {
        width: u32,
        height: u32,
        region_width: u32,
        region_height: u32,
    },

    #[error("readback slot {slot} still has a transfer in flight")]
    Busy { slot: usize },

    #[error(transparent)]
    Compute(#[from] ComputeError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadbackStatus {
    /// Nothing was submitted into the slot
    Idle,
    /// Transfer not finished yet
    Pending,
    /// Tightly packed RGBA8 pixels of the readback region
    Ready(Vec<u8>),
}

pub trait PixelReadback {
    /// Number of slots in the pipeline
    fn depth(&self) -> usize;
    /// Size of the top-left region copied out of each image
    fn region(&self) -> (u32, u32);
    fn submit(&mut self, slot: usize, image: VideoImage<'_>) -> Result<(), ReadbackError>;
    fn poll(&mut self, slot: usize) -> ReadbackStatus;
    /// Drop every in-flight transfer
    fn reset(&mut self);
}

fn check_extent(image: &VideoImage<'_>, region: (u32, u32)) -> Result<(), ReadbackError> {
    let needed = image.width as usize * image.height as usize * BYTES_PER_PIXEL;
    if image.width < region.0 || image.height < region.1 || image.pixels.len() < needed {
        return Err(ReadbackError::ImageTooSmall {
            width: image.width,
            height: image.height,
            region_width: region.0,
            region_height: region.1,
        });
    }
    Ok(())
}

fn copy_region(image: &VideoImage<'_>, region: (u32, u32)) -> Vec<u8> {
    let row_bytes = region.0 as usize * BYTES_PER_PIXEL;
    let stride = image.width as usize * BYTES_PER_PIXEL;
    let mut out = Vec::with_capacity(row_bytes * region.1 as usize);
    for row in 0..region.1 as usize {
        out.extend_from_slice(&image.pixels[row * stride..row * stride + row_bytes]);
    }
    out
}

#[derive(Debug, Default, Clone)]
struct CpuSlot {
    pixels: Option<Vec<u8>>,
    polls_left: u32,
}

/// Copies on the CPU. `latency` simulates transfers that take a number of
/// polls to complete.
#[derive(Debug, Clone)]
pub struct CpuReadback {
    region: (u32, u32),
    slots: Vec<CpuSlot>,
    latency: u32,
}

impl CpuReadback {
    pub fn new(depth: usize, region: (u32, u32)) -> Self {
        Self {
            region,
            slots: vec![CpuSlot::default(); depth.max(2)],
            latency: 0,
        }
    }

    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency = polls;
        self
    }
}

impl PixelReadback for CpuReadback {
    fn depth(&self) -> usize {
        self.slots.len()
    }

    fn region(&self) -> (u32, u32) {
        self.region
    }

    fn submit(&mut self, slot: usize, image: VideoImage<'_>) -> Result<(), ReadbackError> {
        check_extent(&image, self.region)?;
        let pixels = copy_region(&image, self.region);
        self.slots[slot] = CpuSlot {
            pixels: Some(pixels),
            polls_left: self.latency,
        };
        Ok(())
    }

    fn poll(&mut self, slot: usize) -> ReadbackStatus {
        let entry = &mut self.slots[slot];
        if entry.pixels.is_none() {
            return ReadbackStatus::Idle;
        }
        if entry.polls_left > 0 {
            entry.polls_left -= 1;
            return ReadbackStatus::Pending;
        }
        entry.pixels.take().map_or(ReadbackStatus::Idle, ReadbackStatus::Ready)
    }

    fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = CpuSlot::default();
        }
    }
}

type MapReceiver = flume::Receiver<Result<(), wgpu::BufferAsyncError>>;

struct GpuSlot {
    /// Full video frame, kept for presentation once its index is known
    texture: Option<(wgpu::Texture, u32, u32)>,
    download: wgpu::Buffer,
    in_flight: Option<MapReceiver>,
}

/// Uploads each frame into a per-slot texture and copies the watermark
/// region back through a mappable buffer.
pub struct GpuReadback {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    region: (u32, u32),
    padded_bytes_per_row: u32,
    slots: Vec<GpuSlot>,
}

impl GpuReadback {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        depth: usize,
        region: (u32, u32),
    ) -> Self {
        let unpadded = region.0 * BYTES_PER_PIXEL as u32;
        let padded_bytes_per_row = unpadded.div_ceil(COPY_ROW_ALIGNMENT) * COPY_ROW_ALIGNMENT;
        let size = (padded_bytes_per_row * region.1) as u64;

        let slots = (0..depth.max(2))
            .map(|i| GpuSlot {
                texture: None,
                download: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("Watermark Readback {}", i)),
                    size,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                }),
                in_flight: None,
            })
            .collect();

        log::info!(
            "[GpuReadback] {} slots, region {}x{}, row pitch {}",
            depth.max(2),
            region.0,
            region.1,
            padded_bytes_per_row
        );

        Self {
            device,
            queue,
            region,
            padded_bytes_per_row,
            slots,
        }
    }

    /// Texture holding the frame submitted into `slot`.
    pub fn texture(&self, slot: usize) -> Option<&wgpu::Texture> {
        self.slots.get(slot)?.texture.as_ref().map(|(t, _, _)| t)
    }

    fn ensure_texture(&mut self, slot: usize, width: u32, height: u32) {
        let matches = matches!(&self.slots[slot].texture, Some((_, w, h)) if *w == width && *h == height);
        if matches {
            return;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Video Frame"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        self.slots[slot].texture = Some((texture, width, height));
    }
}

impl PixelReadback for GpuReadback {
    fn depth(&self) -> usize {
        self.slots.len()
    }

    fn region(&self) -> (u32, u32) {
        self.region
    }

    fn submit(&mut self, slot: usize, image: VideoImage<'_>) -> Result<(), ReadbackError> {
        check_extent(&image, self.region)?;
        if self.slots[slot].in_flight.is_some() {
            return Err(ReadbackError::Busy { slot });
        }
        self.ensure_texture(slot, image.width, image.height);

        let entry = &mut self.slots[slot];
        let Some((texture, _, _)) = &entry.texture else {
            return Err(ComputeError::Readback {
                message: "texture missing after creation".to_string(),
            }
            .into());
        };

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.width * BYTES_PER_PIXEL as u32),
                rows_per_image: Some(image.height),
            },
            wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
        );

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Watermark Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &entry.download,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.region.1),
                },
            },
            wgpu::Extent3d {
                width: self.region.0,
                height: self.region.1,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = flume::bounded(1);
        entry.download.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            if tx.send(result).is_err() {
                log::trace!("[GpuReadback] map_async result dropped - slot was reset");
            }
        });
        entry.in_flight = Some(rx);
        Ok(())
    }

    fn poll(&mut self, slot: usize) -> ReadbackStatus {
        let Some(receiver) = &self.slots[slot].in_flight else {
            return ReadbackStatus::Idle;
        };

        self.device.poll(wgpu::Maintain::Poll);

        let result = match receiver.try_recv() {
            Err(flume::TryRecvError::Empty) => {
                log::trace!("[GpuReadback] Fence not signaled for slot {}", slot);
                return ReadbackStatus::Pending;
            }
            Ok(result) => result,
            Err(flume::TryRecvError::Disconnected) => {
                log::warn!("[GpuReadback] Map callback for slot {} never ran", slot);
                self.slots[slot].in_flight = None;
                return ReadbackStatus::Idle;
            }
        };
        self.slots[slot].in_flight = None;

        if let Err(e) = result {
            log::warn!("[GpuReadback] Mapping slot {} failed: {}", slot, e);
            return ReadbackStatus::Idle;
        }

        let download = &self.slots[slot].download;
        let row_bytes = self.region.0 as usize * BYTES_PER_PIXEL;
        let mut pixels = Vec::with_capacity(row_bytes * self.region.1 as usize);
        {
            let data = download.slice(..).get_mapped_range();
            for row in data.chunks(self.padded_bytes_per_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        download.unmap();
        ReadbackStatus::Ready(pixels)
    }

    fn reset(&mut self) {
        for slot in &mut self.slots {
            if slot.in_flight.take().is_some() {
                slot.download.unmap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> Vec<u8> {
        (0..width * height * 4).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_cpu_region_copy() {
        let pixels = image(8, 4);
        let mut readback = CpuReadback::new(3, (2, 2));
        readback
            .submit(0, VideoImage { width: 8, height: 4, pixels: &pixels })
            .unwrap();

        let ReadbackStatus::Ready(region) = readback.poll(0) else {
            panic!("expected ready");
        };
        assert_eq!(&region[..8], &pixels[..8]);
        assert_eq!(&region[8..], &pixels[32..40]);
        assert_eq!(readback.poll(0), ReadbackStatus::Idle);
    }

    #[test]
    fn test_cpu_latency() {
        let pixels = image(4, 1);
        let mut readback = CpuReadback::new(2, (4, 1)).with_latency(2);
        readback
            .submit(1, VideoImage { width: 4, height: 1, pixels: &pixels })
            .unwrap();
        assert_eq!(readback.poll(1), ReadbackStatus::Pending);
        assert_eq!(readback.poll(1), ReadbackStatus::Pending);
        assert!(matches!(readback.poll(1), ReadbackStatus::Ready(_)));
    }

    #[test]
    fn test_image_too_small() {
        let pixels = image(4, 1);
        let mut readback = CpuReadback::new(2, (8, 1));
        assert!(matches!(
            readback.submit(0, VideoImage { width: 4, height: 1, pixels: &pixels }),
            Err(ReadbackError::ImageTooSmall { .. })
        ));
    }

    fn init_gpu() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
        pollster::block_on(crate::mesh::gpu::request_device()).ok()
    }

    #[test]
    fn test_gpu_readback_matches_cpu() {
        let Some((device, queue)) = init_gpu() else {
            eprintln!("Skipping GPU readback test: no adapter");
            return;
        };
        let pixels = image(80, 4);
        let frame = VideoImage { width: 80, height: 4, pixels: &pixels };

        let mut gpu = GpuReadback::new(device.clone(), queue, 2, (34, 2));
        let mut cpu = CpuReadback::new(2, (34, 2));
        gpu.submit(0, frame).unwrap();
        cpu.submit(0, frame).unwrap();

        device.poll(wgpu::Maintain::Wait);
        assert_eq!(gpu.poll(0), cpu.poll(0));
        assert!(gpu.texture(0).is_some());
    }
}
