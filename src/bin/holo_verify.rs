//! Stream verification utility
//!
//! Downloads a stream, decodes every mesh frame with the scalar reference
//! path and with the configured decode path, and reports how far the two
//! diverge.
//!
//! Usage: `holo-verify <manifest path or URL> [config.toml]`

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use holovideo::mesh::{create_backend, FrameBytes, ScalarBackend};
use holovideo::streaming::{url_root, Fetcher, FileFetcher};
use holovideo::{FallbackFrame, MeshDecoder, PlayerConfig, StreamLayout};

struct ResidentBuffers(HashMap<usize, Vec<u8>>);

impl FrameBytes for ResidentBuffers {
    fn buffer_bytes(&self, buffer: usize) -> Option<&[u8]> {
        self.0.get(&buffer).map(Vec::as_slice)
    }
}

fn fetcher_for(url: &str) -> anyhow::Result<Arc<dyn Fetcher>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        #[cfg(feature = "native")]
        {
            return Ok(Arc::new(holovideo::HttpFetcher::new()?));
        }
        #[cfg(not(feature = "native"))]
        bail!("HTTP streams need the `native` feature");
    }
    Ok(Arc::new(FileFetcher))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run() {
        log::error!("Verification failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: holo-verify <manifest> [config.toml]");
    };
    let config = match args.next() {
        Some(path) => PlayerConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => PlayerConfig::default(),
    };
    config.validate()?;

    let fetcher = fetcher_for(&url)?;
    let manifest = fetcher
        .fetch(&url)
        .wait()
        .with_context(|| format!("fetching manifest {}", url))?;
    let layout = StreamLayout::from_slice(&manifest)?;
    let info = &layout.file_info;
    log::info!(
        "[Verify] {} frames, {} buffers, {} segments, video {}x{}, normals: {}",
        layout.frames.len(),
        layout.buffers.len(),
        layout.timeline.len(),
        info.video_width,
        info.video_height,
        info.have_normals
    );

    let root = url_root(&url);
    let mut resident = HashMap::new();
    for (index, spec) in layout.buffers.iter().enumerate() {
        let buffer_url = format!("{}{}", root, spec.uri);
        let bytes = fetcher
            .fetch(&buffer_url)
            .wait()
            .with_context(|| format!("fetching buffer {}", buffer_url))?;
        if bytes.len() < spec.byte_length {
            bail!(
                "buffer {} is {} bytes, manifest declares {}",
                buffer_url,
                bytes.len(),
                spec.byte_length
            );
        }
        log::debug!("[Verify] Buffer {} ({} bytes)", index, bytes.len());
        resident.insert(index, bytes);
    }
    let buffers = ResidentBuffers(resident);

    if let (Some(fallback), Some(bytes)) = (&layout.fallback, buffers.buffer_bytes(0)) {
        let frame = FallbackFrame::from_bytes(fallback, bytes)?;
        log::info!(
            "[Verify] Fallback frame: {} vertices, {} indices, image: {}",
            frame.vertex_count(),
            frame.index_count(),
            frame.image.is_some()
        );
    }

    let mut reference = MeshDecoder::new(Box::new(ScalarBackend));
    let mut candidate = MeshDecoder::new(create_backend(config.decode_backend));
    log::info!("[Verify] Comparing scalar against {}", candidate.backend_name());

    let mut worst_position = (0.0f32, 0usize);
    let mut worst_normal = (0.0f32, 0usize);
    for frame in &layout.frames {
        let expected = reference.decode(frame, &buffers)?;
        let actual = candidate.decode(frame, &buffers)?;

        let position_error = expected
            .positions
            .iter()
            .zip(actual.positions.iter())
            .map(|(a, b)| (*a - *b).abs().max_element())
            .fold(0.0f32, f32::max);
        if position_error > worst_position.0 {
            worst_position = (position_error, frame.index);
        }

        if let (Some(a), Some(b)) = (&expected.normals, &actual.normals) {
            let normal_error = a
                .iter()
                .zip(b.iter())
                .map(|(a, b)| (*a - *b).abs().max_element())
                .fold(0.0f32, f32::max);
            if normal_error > worst_normal.0 {
                worst_normal = (normal_error, frame.index);
            }
        }
    }

    let extent = (info.bounding_box.max - info.bounding_box.min).max_element().max(f32::EPSILON);
    println!("Frames decoded:       {}", layout.frames.len());
    println!(
        "Max position error:   {:.3e} (frame {}, {:.3e} of extent)",
        worst_position.0,
        worst_position.1,
        worst_position.0 / extent
    );
    println!("Max normal error:     {:.3e} (frame {})", worst_normal.0, worst_normal.1);

    if worst_position.0 / extent > 1e-4 || worst_normal.0 > 1e-3 {
        bail!("{} path diverges from the scalar reference", candidate.backend_name());
    }
    Ok(())
}
