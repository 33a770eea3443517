// SPDX-License-Identifier: GPL-3.0-only

//! Depth-to-world transform
//!
//! A background worker converts every depth frame into a buffer of
//! homogeneous world coordinates, one `(X, Y, Z, 1.0)` texel per depth
//! pixel, laid out row-major. The result is published through a
//! [`DoubleBuffer`] so readers always see a complete frame.

use crate::backends::sensor::{CoordinateMapper, LoopAction, LoopController};
use crate::constants::depth;
use crate::errors::SensorError;
use crate::pipelines::double_buffer::DoubleBuffer;
use crate::pipelines::store::{BufferKind, DepthBuffer, FrameStore};
use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One world-space sample
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct WorldTexel {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// World coordinates for one depth frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldBuffer {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<WorldTexel>,
}

impl WorldBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![WorldTexel::default(); width as usize * height as usize],
        }
    }

    /// Resize for a new resolution. A no-op when the size is unchanged.
    pub fn ensure_size(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize;
        if self.width != width || self.height != height || self.texels.len() != len {
            debug!(width, height, "Allocating world buffer");
            self.width = width;
            self.height = height;
            self.texels = vec![WorldTexel::default(); len];
        }
    }

    /// Flat `[x, y, z, w, x, y, z, w, ...]` view, 4 floats per depth pixel
    pub fn as_floats(&self) -> &[f32] {
        bytemuck::cast_slice(&self.texels)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    pub fn get(&self, index: usize) -> Option<WorldTexel> {
        self.texels.get(index).copied()
    }
}

/// Fill `out` with the world coordinates of every pixel in `depth`.
///
/// Rows are processed in parallel; `out` must already be sized to match.
pub fn unproject_into(
    mapper: &dyn CoordinateMapper,
    depth: &DepthBuffer,
    out: &mut WorldBuffer,
) -> Result<(), SensorError> {
    let format = depth.format;
    let width = format.width as usize;
    if depth.data.len() != format.pixel_count() || out.texels.len() != depth.data.len() {
        return Err(SensorError::MappingFailed(format!(
            "{} depth samples for {} into {} texels",
            depth.data.len(),
            format,
            out.texels.len()
        )));
    }
    if width == 0 {
        return Ok(());
    }

    out.texels
        .par_chunks_mut(width)
        .zip(depth.data.par_chunks(width))
        .enumerate()
        .try_for_each(|(y, (out_row, in_row))| {
            for (x, (texel, &depth_mm)) in out_row.iter_mut().zip(in_row).enumerate() {
                let point = mapper.depth_to_world(format, x as u32, y as u32, depth_mm)?;
                *texel = WorldTexel {
                    x: point.x,
                    y: point.y,
                    z: point.z,
                    w: depth::WORLD_W,
                };
            }
            Ok(())
        })
}

/// Pass counters
#[derive(Debug, Default)]
pub struct ProjectorStats {
    pub passes: AtomicU64,
    pub failures: AtomicU64,
}

/// Runs one transform pass against the latest depth frame
pub struct WorldPass {
    store: Arc<FrameStore>,
    mapper: Arc<dyn CoordinateMapper>,
    buffers: Arc<DoubleBuffer<WorldBuffer>>,
    stats: Arc<ProjectorStats>,
    snapshot: DepthBuffer,
}

impl WorldPass {
    pub fn new(
        store: Arc<FrameStore>,
        mapper: Arc<dyn CoordinateMapper>,
        buffers: Arc<DoubleBuffer<WorldBuffer>>,
        stats: Arc<ProjectorStats>,
    ) -> Self {
        Self {
            store,
            mapper,
            buffers,
            stats,
            snapshot: DepthBuffer::empty(),
        }
    }

    /// Transform the latest depth frame and publish it.
    ///
    /// Returns the published generation, or `None` when there was no depth
    /// frame or the pass failed. A failed pass leaves the published buffer
    /// untouched.
    pub fn run(&mut self) -> Option<u64> {
        if !self.store.copy_depth_into(&mut self.snapshot) {
            return None;
        }

        let snapshot = &self.snapshot;
        let mapper = self.mapper.as_ref();
        let format = snapshot.format;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.buffers.write_inactive(|world| {
                world.ensure_size(format.width, format.height);
                unproject_into(mapper, snapshot, world)
            })
        }));

        match outcome {
            Ok(Ok(generation)) => {
                self.stats.passes.fetch_add(1, Ordering::Relaxed);
                self.store.dirty().mark(BufferKind::World);
                debug!(generation, frame = snapshot.frame_number, "World buffer published");
                Some(generation)
            }
            Ok(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, frame = snapshot.frame_number, "World transform pass failed");
                None
            }
            Err(_) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(frame = snapshot.frame_number, "World transform pass panicked");
                None
            }
        }
    }
}

/// Background depth-to-world worker
pub struct WorldProjector {
    buffers: Arc<DoubleBuffer<WorldBuffer>>,
    stats: Arc<ProjectorStats>,
    worker: Option<LoopController>,
}

impl Default for WorldProjector {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldProjector {
    pub fn new() -> Self {
        Self {
            buffers: Arc::new(DoubleBuffer::default()),
            stats: Arc::new(ProjectorStats::default()),
            worker: None,
        }
    }

    /// Published world buffers, shared with the publisher
    pub fn buffers(&self) -> Arc<DoubleBuffer<WorldBuffer>> {
        Arc::clone(&self.buffers)
    }

    pub fn stats(&self) -> &ProjectorStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.is_running())
    }

    /// A pass bound to this projector's buffers, for running synchronously
    pub fn pass(&self, store: Arc<FrameStore>, mapper: Arc<dyn CoordinateMapper>) -> WorldPass {
        WorldPass::new(store, mapper, self.buffers(), Arc::clone(&self.stats))
    }

    /// Start the worker. Each new depth frame triggers one pass; between
    /// frames the worker waits at most `idle_wait` before re-checking its
    /// stop signal.
    pub fn start(
        &mut self,
        store: Arc<FrameStore>,
        mapper: Arc<dyn CoordinateMapper>,
        idle_wait: Duration,
    ) {
        if self.worker.is_some() {
            debug!("World projector already running");
            return;
        }

        let mut pass = self.pass(Arc::clone(&store), mapper);
        let mut seen = store.depth_generation();
        info!(idle_wait_ms = idle_wait.as_millis() as u64, "Starting world projector");

        self.worker = Some(LoopController::start("world-transform", move || {
            if let Some(generation) = store.wait_for_depth(seen, idle_wait) {
                seen = generation;
                pass.run();
            }
            LoopAction::Continue
        }));
    }

    /// Stop the worker, waiting for a pass in flight
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            info!(
                passes = self.stats.passes.load(Ordering::Relaxed),
                failures = self.stats.failures.load(Ordering::Relaxed),
                "World projector stopped"
            );
        }
    }
}

impl Drop for WorldProjector {
    fn drop(&mut self) {
        self.stop();
    }
}
