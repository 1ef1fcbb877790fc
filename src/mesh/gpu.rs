//! wgpu compute execution path for mesh decode.
//!
//! Runs the keyframe dequantize, delta predict+correct and oct-normal
//! transforms as one invocation per vertex and reads the result back.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use super::backend::DecodeBackend;
use super::DecodeError;
use crate::codec::DecodeBounds;
use crate::constants::gpu_limits;

#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("no compatible GPU adapter found")]
    AdapterUnavailable,

    #[error("GPU device request failed: {message}")]
    DeviceRequest { message: String },

    #[error("GPU readback failed: {message}")]
    Readback { message: String },
}

const MODE_HAS_PREV_PREV: u32 = 1;

/// Uniform block shared by every decode kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct DecodeParams {
    decode_min: [f32; 4],
    decode_max: [f32; 4],
    vertex_count: u32,
    mode: u32,
    _padding: [u32; 2],
}

impl DecodeParams {
    fn new(bounds: Option<&DecodeBounds>, vertex_count: usize, mode: u32) -> Self {
        let (min, max) = bounds.map_or((Vec3::ZERO, Vec3::ZERO), |b| (b.min, b.max));
        Self {
            decode_min: min.extend(0.0).to_array(),
            decode_max: max.extend(0.0).to_array(),
            vertex_count: vertex_count as u32,
            mode,
            _padding: [0; 2],
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Kernel {
    Keyframe,
    Delta,
    OctNormals,
}

/// Device buffer kept across decode calls; only reallocated to grow.
struct ScratchBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: Option<wgpu::Buffer>,
}

impl ScratchBuffer {
    fn new(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            usage,
            buffer: None,
        }
    }

    #[cfg(test)]
    fn capacity(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.size())
    }

    fn ensure(&mut self, device: &wgpu::Device, size: u64) -> &wgpu::Buffer {
        let size = size.max(16);
        if self.buffer.as_ref().is_some_and(|b| b.size() < size) {
            self.buffer = None;
        }
        let (label, usage) = (self.label, self.usage);
        self.buffer.get_or_insert_with(|| {
            let capacity = size.next_power_of_two();
            log::debug!("[GpuBackend] Allocating {} ({} bytes)", label, capacity);
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: capacity,
                usage,
                mapped_at_creation: false,
            })
        })
    }

    fn discard(&mut self) {
        self.buffer = None;
    }
}

/// Write `bytes` into `scratch`, zero-padded to whole u32 words.
fn upload<'a>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    scratch: &'a mut ScratchBuffer,
    bytes: &[u8],
) -> &'a wgpu::Buffer {
    let padded_len = bytes.len().div_ceil(4) * 4;
    let buffer = scratch.ensure(device, padded_len as u64);
    if bytes.len() == padded_len {
        if !bytes.is_empty() {
            queue.write_buffer(buffer, 0, bytes);
        }
    } else {
        let mut padded = bytes.to_vec();
        padded.resize(padded_len, 0);
        queue.write_buffer(buffer, 0, &padded);
    }
    buffer
}

/// GPU decode backend
pub struct GpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    bind_group_layout: wgpu::BindGroupLayout,
    keyframe_pipeline: wgpu::ComputePipeline,
    delta_pipeline: wgpu::ComputePipeline,
    normals_pipeline: wgpu::ComputePipeline,

    /// Bound in place of history inputs a kernel does not read
    placeholder: wgpu::Buffer,

    params: ScratchBuffer,
    input: ScratchBuffer,
    previous: ScratchBuffer,
    previous_previous: ScratchBuffer,
    output: ScratchBuffer,
    download: ScratchBuffer,
}

impl GpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mesh Decode Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/mesh_decode.wgsl").into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mesh Decode Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, true),
                storage(3, true),
                storage(4, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Decode Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
            })
        };

        let keyframe_pipeline = pipeline("Keyframe Decode Pipeline", "decode_keyframe");
        let delta_pipeline = pipeline("Delta Decode Pipeline", "decode_delta");
        let normals_pipeline = pipeline("Oct Normal Decode Pipeline", "decode_oct_normals");

        let placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mesh Decode Placeholder"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let storage_in = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;

        Self {
            device,
            queue,
            bind_group_layout,
            keyframe_pipeline,
            delta_pipeline,
            normals_pipeline,
            placeholder,
            params: ScratchBuffer::new(
                "Mesh Decode Params",
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            ),
            input: ScratchBuffer::new("Mesh Decode Input", storage_in),
            previous: ScratchBuffer::new("Previous Positions", storage_in),
            previous_previous: ScratchBuffer::new("Previous Previous Positions", storage_in),
            output: ScratchBuffer::new(
                "Mesh Decode Output",
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            ),
            download: ScratchBuffer::new(
                "Mesh Decode Download",
                wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            ),
        }
    }

    /// Create a device of its own, for use without a renderer.
    pub fn new_headless() -> Result<Self, ComputeError> {
        let (device, queue) = pollster::block_on(request_device())?;
        Ok(Self::new(device, queue))
    }

    /// Dispatch one kernel over `vertex_count` vertices and read back XYZ floats.
    fn run(
        &mut self,
        kernel: Kernel,
        params: DecodeParams,
        input: &[u8],
        prev: Option<&[Vec3]>,
        prev_prev: Option<&[Vec3]>,
    ) -> Result<Vec<Vec3>, DecodeError> {
        let vertex_count = params.vertex_count as usize;
        if vertex_count == 0 {
            return Ok(Vec::new());
        }

        let device = &self.device;
        let queue = &self.queue;

        let params_buffer = upload(device, queue, &mut self.params, bytemuck::bytes_of(&params));
        let input_buffer = upload(device, queue, &mut self.input, input);
        let prev_buffer = match prev {
            Some(p) => Some(upload(device, queue, &mut self.previous, bytemuck::cast_slice(p))),
            None => None,
        };
        let prev_prev_buffer = match prev_prev {
            Some(pp) => Some(upload(device, queue, &mut self.previous_previous, bytemuck::cast_slice(pp))),
            None => None,
        };

        let output_size = (vertex_count * std::mem::size_of::<Vec3>()) as u64;
        let output = self.output.ensure(device, output_size);
        let download = self.download.ensure(device, output_size);

        let pipeline = match kernel {
            Kernel::Keyframe => &self.keyframe_pipeline,
            Kernel::Delta => &self.delta_pipeline,
            Kernel::OctNormals => &self.normals_pipeline,
        };

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Mesh Decode Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: prev_buffer.unwrap_or(&self.placeholder).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: prev_prev_buffer.unwrap_or(&self.placeholder).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: output.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Mesh Decode Encoder"),
        });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Mesh Decode Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            let workgroups = (params.vertex_count + gpu_limits::WORKGROUP_SIZE - 1)
                / gpu_limits::WORKGROUP_SIZE;
            compute_pass.dispatch_workgroups(workgroups, 1, 1);
        }

        encoder.copy_buffer_to_buffer(output, 0, download, 0, output_size);
        queue.submit(std::iter::once(encoder.finish()));

        let result = read_back(device, download, output_size);
        if result.is_err() {
            // Never reuse a buffer whose map state is unknown
            self.download.discard();
        }
        result
    }
}

fn read_back(device: &wgpu::Device, download: &wgpu::Buffer, size: u64) -> Result<Vec<Vec3>, DecodeError> {
    let buffer_slice = download.slice(..size);
    let (tx, rx) = flume::bounded(1);
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        if tx.send(result).is_err() {
            log::error!("[GpuBackend] map_async result dropped - receiver gone");
        }
    });

    device.poll(wgpu::Maintain::Wait);

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(ComputeError::Readback {
                message: e.to_string(),
            }
            .into())
        }
        Err(_) => {
            return Err(ComputeError::Readback {
                message: "map_async callback never ran".to_string(),
            }
            .into())
        }
    }

    let data = buffer_slice.get_mapped_range();
    let values: Vec<Vec3> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    download.unmap();

    Ok(values)
}

impl DecodeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn dequantize_positions(
        &mut self,
        quantized: &[u8],
        bounds: &DecodeBounds,
    ) -> Result<Vec<Vec3>, DecodeError> {
        let vertex_count = quantized.len() / 6;
        let params = DecodeParams::new(Some(bounds), vertex_count, 0);
        self.run(Kernel::Keyframe, params, quantized, None, None)
    }

    fn decode_deltas(
        &mut self,
        deltas: &[u8],
        bounds: &DecodeBounds,
        previous: &[Vec3],
        previous_previous: Option<&[Vec3]>,
    ) -> Result<Vec<Vec3>, DecodeError> {
        let vertex_count = deltas.len() / 3;
        let pp_len = previous_previous.map_or(vertex_count, |pp| pp.len());
        if previous.len() != vertex_count || pp_len != vertex_count {
            return Err(DecodeError::VertexCountMismatch {
                frame: 0,
                expected: previous.len(),
                actual: vertex_count,
            });
        }

        let mode = if previous_previous.is_some() { MODE_HAS_PREV_PREV } else { 0 };
        let params = DecodeParams::new(Some(bounds), vertex_count, mode);
        self.run(Kernel::Delta, params, deltas, Some(previous), previous_previous)
    }

    fn decode_oct_normals(&mut self, encoded: &[u8]) -> Result<Vec<Vec3>, DecodeError> {
        let vertex_count = encoded.len() / 2;
        let params = DecodeParams::new(None, vertex_count, 0);
        self.run(Kernel::OctNormals, params, encoded, None, None)
    }
}

/// Request a compute-capable device without a surface.
pub async fn request_device() -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>), ComputeError> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(ComputeError::AdapterUnavailable)?;

    log::info!("[GpuBackend] Using adapter: {:?}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Holovideo Decode Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        )
        .await
        .map_err(|e| ComputeError::DeviceRequest {
            message: e.to_string(),
        })?;

    Ok((Arc::new(device), Arc::new(queue)))
}
