// SPDX-License-Identifier: GPL-3.0-only

//! Buffer publication
//!
//! Exposes the latest color, depth and world buffers to consumers. The
//! world buffer is read under a bounded lock so a stalled transform worker
//! can never hang the caller; on timeout the caller keeps what it had.

use crate::backends::sensor::Skeleton;
use crate::errors::PublishError;
use crate::pipelines::double_buffer::DoubleBuffer;
use crate::pipelines::store::{BufferKind, ColorBuffer, DepthBuffer, FrameStore};
use crate::pipelines::world::WorldBuffer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// An owned copy of a published buffer
#[derive(Debug, Clone)]
pub enum Published {
    Color(ColorBuffer),
    Depth(DepthBuffer),
    World { buffer: WorldBuffer, generation: u64 },
    Skeletons(Vec<Skeleton>),
}

/// Consumer-side texture store, one set of textures per handle
///
/// Implementations create textures lazily in `ensure` and must tolerate
/// repeated calls with an unchanged size.
pub trait PresentationSink {
    type Handle;

    /// Make sure a texture of this size exists for `handle`
    fn ensure(&mut self, handle: &Self::Handle, kind: BufferKind, width: u32, height: u32);

    /// Replace the texture contents
    fn update(&mut self, handle: &Self::Handle, kind: BufferKind, bytes: &[u8]);

    /// Release all textures held for `handle`
    fn destroy(&mut self, handle: &Self::Handle);
}

/// What one `present` call uploaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentSummary {
    pub color: bool,
    pub depth: bool,
    pub world: bool,
    /// The world buffer was dirty but not readable in time
    pub world_timed_out: bool,
}

/// Read side of the pipeline
#[derive(Clone)]
pub struct BufferPublisher {
    store: Arc<FrameStore>,
    world: Arc<DoubleBuffer<WorldBuffer>>,
    timeout: Duration,
}

impl BufferPublisher {
    pub fn new(
        store: Arc<FrameStore>,
        world: Arc<DoubleBuffer<WorldBuffer>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            world,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Copy out the latest buffer of `kind`.
    ///
    /// Fails with `Unavailable` when nothing has been captured yet or the
    /// world buffer could not be read within the timeout. Dirty flags are
    /// left alone.
    pub fn publish(&self, kind: BufferKind) -> Result<Published, PublishError> {
        match kind {
            BufferKind::Color => self
                .store
                .snapshot_color()
                .map(Published::Color)
                .ok_or(PublishError::Unavailable),
            BufferKind::Depth => self
                .store
                .snapshot_depth()
                .map(Published::Depth)
                .ok_or(PublishError::Unavailable),
            BufferKind::World => self.read_world(|buffer, generation| Published::World {
                buffer: buffer.clone(),
                generation,
            }),
            BufferKind::Skeleton => Ok(Published::Skeletons(self.store.snapshot_skeletons())),
        }
    }

    /// Borrow the published world buffer under the bounded read lock
    pub fn read_world<R>(&self, f: impl FnOnce(&WorldBuffer, u64) -> R) -> Result<R, PublishError> {
        let Some(read) = self.world.read_active(self.timeout) else {
            trace!(timeout_ms = self.timeout.as_millis() as u64, "World buffer unavailable");
            return Err(PublishError::Unavailable);
        };
        Ok(f(&read, read.generation()))
    }

    /// Upload every dirty texture to `sink` for `handle`.
    ///
    /// Each dirty flag is taken before its buffer is read, so a frame that
    /// lands during the upload stays dirty for the next call. A timed-out
    /// world read re-marks its flag while the sink keeps its previous
    /// contents.
    pub fn present<S: PresentationSink>(&self, sink: &mut S, handle: &S::Handle) -> PresentSummary {
        let dirty = self.store.dirty();
        let mut summary = PresentSummary::default();

        if dirty.take(BufferKind::Color) {
            match self.store.snapshot_color() {
                Some(color) => {
                    sink.ensure(handle, BufferKind::Color, color.format.width, color.format.height);
                    sink.update(handle, BufferKind::Color, &color.data);
                    summary.color = true;
                }
                None => dirty.mark(BufferKind::Color),
            }
        }

        if dirty.take(BufferKind::Depth) {
            match self.store.snapshot_depth() {
                Some(depth) => {
                    sink.ensure(handle, BufferKind::Depth, depth.format.width, depth.format.height);
                    sink.update(handle, BufferKind::Depth, bytemuck::cast_slice(&depth.data));
                    summary.depth = true;
                }
                None => dirty.mark(BufferKind::Depth),
            }
        }

        if dirty.take(BufferKind::World) {
            let uploaded = self.read_world(|world, generation| {
                sink.ensure(handle, BufferKind::World, world.width, world.height);
                sink.update(handle, BufferKind::World, world.as_bytes());
                generation
            });
            match uploaded {
                Ok(generation) => {
                    summary.world = true;
                    trace!(generation, "World texture updated");
                }
                Err(e) => {
                    dirty.mark(BufferKind::World);
                    debug!(error = %e, "Keeping previous world texture");
                    summary.world_timed_out = true;
                }
            }
        }

        summary
    }

    /// Release a consumer's textures
    pub fn destroy<S: PresentationSink>(&self, sink: &mut S, handle: &S::Handle) {
        sink.destroy(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{ColorImageFormat, ColorLayout, DepthImageFormat};
    use std::collections::HashMap;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct MemorySink {
        textures: HashMap<(u32, BufferKind), Vec<u8>>,
        sizes: HashMap<(u32, BufferKind), (u32, u32)>,
    }

    impl PresentationSink for MemorySink {
        type Handle = u32;

        fn ensure(&mut self, handle: &u32, kind: BufferKind, width: u32, height: u32) {
            self.sizes.insert((*handle, kind), (width, height));
        }

        fn update(&mut self, handle: &u32, kind: BufferKind, bytes: &[u8]) {
            self.textures.insert((*handle, kind), bytes.to_vec());
        }

        fn destroy(&mut self, handle: &u32) {
            self.textures.retain(|(h, _), _| h != handle);
            self.sizes.retain(|(h, _), _| h != handle);
        }
    }

    fn publisher() -> (Arc<FrameStore>, Arc<DoubleBuffer<WorldBuffer>>, BufferPublisher) {
        let store = Arc::new(FrameStore::new());
        let world = Arc::new(DoubleBuffer::default());
        let publisher = BufferPublisher::new(
            Arc::clone(&store),
            Arc::clone(&world),
            Duration::from_millis(100),
        );
        (store, world, publisher)
    }

    fn publish_world(world: &DoubleBuffer<WorldBuffer>, width: u32, height: u32) {
        world
            .write_inactive(|w| {
                w.ensure_size(width, height);
                Ok::<(), ()>(())
            })
            .unwrap();
    }

    #[test]
    fn test_nothing_captured_is_unavailable() {
        let (_, _, publisher) = publisher();
        assert!(matches!(
            publisher.publish(BufferKind::Color),
            Err(PublishError::Unavailable)
        ));
        assert!(matches!(
            publisher.publish(BufferKind::World),
            Err(PublishError::Unavailable)
        ));
    }

    #[test]
    fn test_present_uploads_and_clears_dirty() {
        let (store, world, publisher) = publisher();
        store.submit_color(ColorImageFormat::new(2, 1, ColorLayout::Bgra), &[7; 8], 1, 0);
        store.submit_depth(DepthImageFormat::new(2, 1), &[1000, 2000], 1, 0);
        publish_world(&world, 2, 1);
        store.dirty().mark(BufferKind::World);

        let mut sink = MemorySink::default();
        let summary = publisher.present(&mut sink, &1);
        assert!(summary.color && summary.depth && summary.world);
        assert_eq!(sink.textures[&(1, BufferKind::Depth)].len(), 4);
        assert_eq!(sink.textures[&(1, BufferKind::World)].len(), 2 * 16);
        assert_eq!(sink.sizes[&(1, BufferKind::Color)], (2, 1));
        assert!(!store.dirty().is_dirty(BufferKind::Color));

        // Nothing changed, nothing uploaded
        assert_eq!(publisher.present(&mut sink, &1), PresentSummary::default());

        publisher.destroy(&mut sink, &1);
        assert!(sink.textures.is_empty());
    }

    /// Submits the next color frame from inside the first color upload
    struct RacingSink {
        store: Arc<FrameStore>,
        raced: bool,
        shown: Vec<u8>,
    }

    impl PresentationSink for RacingSink {
        type Handle = ();

        fn ensure(&mut self, _handle: &(), _kind: BufferKind, _width: u32, _height: u32) {}

        fn update(&mut self, _handle: &(), kind: BufferKind, bytes: &[u8]) {
            if kind != BufferKind::Color {
                return;
            }
            self.shown = bytes.to_vec();
            if !self.raced {
                self.raced = true;
                let format = ColorImageFormat::new(1, 1, ColorLayout::Bgra);
                self.store.submit_color(format, &[2; 4], 2, 33);
            }
        }

        fn destroy(&mut self, _handle: &()) {}
    }

    #[test]
    fn test_frame_arriving_during_upload_is_presented_next() {
        let (store, _, publisher) = publisher();
        store.submit_color(ColorImageFormat::new(1, 1, ColorLayout::Bgra), &[1; 4], 1, 0);

        let mut sink = RacingSink {
            store: Arc::clone(&store),
            raced: false,
            shown: Vec::new(),
        };
        assert!(publisher.present(&mut sink, &()).color);
        assert_eq!(sink.shown, vec![1; 4]);
        assert!(store.dirty().is_dirty(BufferKind::Color));

        assert!(publisher.present(&mut sink, &()).color);
        assert_eq!(sink.shown, vec![2; 4]);
        assert!(!store.dirty().is_dirty(BufferKind::Color));
    }

    #[test]
    fn test_world_timeout_keeps_dirty() {
        let (store, world, publisher) = publisher();
        publish_world(&world, 4, 4);
        store.dirty().mark(BufferKind::World);

        let active = world.active_index();
        let blocker = Arc::clone(&world);
        let handle = thread::spawn(move || blocker.block_slot(active, Duration::from_millis(400)));
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        let mut sink = MemorySink::default();
        let summary = publisher.present(&mut sink, &1);
        let waited = start.elapsed();

        assert!(summary.world_timed_out);
        assert!(!summary.world);
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(350));
        assert!(store.dirty().is_dirty(BufferKind::World));
        assert!(!sink.textures.contains_key(&(1, BufferKind::World)));
        handle.join().unwrap();

        assert!(publisher.present(&mut sink, &1).world);
    }
}
