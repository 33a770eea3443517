// SPDX-License-Identifier: GPL-3.0-only

//! Latest-frame storage
//!
//! Holds the most recent color, depth and skeleton data. Each kind has its
//! own lock so a slow reader of one kind never blocks writers of another.
//! Buffers are reallocated only when the incoming length changes; otherwise
//! frames are copied into the existing allocation.

use crate::backends::sensor::{ColorImageFormat, DepthImageFormat, Skeleton};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Buffers tracked for change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Color,
    Depth,
    World,
    Skeleton,
}

/// Per-kind "changed since last publish" flags
#[derive(Debug, Default)]
pub struct DirtyFlags {
    color: AtomicBool,
    depth: AtomicBool,
    world: AtomicBool,
    skeleton: AtomicBool,
}

impl DirtyFlags {
    fn flag(&self, kind: BufferKind) -> &AtomicBool {
        match kind {
            BufferKind::Color => &self.color,
            BufferKind::Depth => &self.depth,
            BufferKind::World => &self.world,
            BufferKind::Skeleton => &self.skeleton,
        }
    }

    pub fn mark(&self, kind: BufferKind) {
        self.flag(kind).store(true, Ordering::Release);
    }

    pub fn is_dirty(&self, kind: BufferKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set. A `mark` racing with
    /// the caller's read of the buffer survives for the next take.
    pub fn take(&self, kind: BufferKind) -> bool {
        self.flag(kind).swap(false, Ordering::AcqRel)
    }
}

/// Latest color frame
#[derive(Debug, Clone)]
pub struct ColorBuffer {
    pub format: ColorImageFormat,
    pub data: Vec<u8>,
    pub frame_number: u32,
    pub timestamp_ms: i64,
}

/// Latest depth frame (raw millimeters)
#[derive(Debug, Clone)]
pub struct DepthBuffer {
    pub format: DepthImageFormat,
    pub data: Vec<u16>,
    pub frame_number: u32,
    pub timestamp_ms: i64,
}

impl DepthBuffer {
    pub fn empty() -> Self {
        Self {
            format: DepthImageFormat::new(0, 0),
            data: Vec::new(),
            frame_number: 0,
            timestamp_ms: 0,
        }
    }
}

/// Frame counter and timestamp of the most recent color frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameInfo {
    pub frame_number: u32,
    pub timestamp_seconds: f64,
}

impl FrameInfo {
    fn new(frame_number: u32, timestamp_ms: i64) -> Self {
        Self {
            frame_number,
            timestamp_seconds: timestamp_ms as f64 / 1000.0,
        }
    }
}

/// Latest-value store shared by the capture loop, the world worker and the
/// publisher
#[derive(Debug, Default)]
pub struct FrameStore {
    color: Mutex<Option<ColorBuffer>>,
    depth: Mutex<Option<DepthBuffer>>,
    skeletons: Mutex<Vec<Skeleton>>,
    frame_info: Mutex<Option<FrameInfo>>,
    dirty: DirtyFlags,
    depth_generation: Mutex<u64>,
    depth_arrived: Condvar,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dirty(&self) -> &DirtyFlags {
        &self.dirty
    }

    /// Copy a color frame into the store
    pub fn submit_color(
        &self,
        format: ColorImageFormat,
        pixels: &[u8],
        frame_number: u32,
        timestamp_ms: i64,
    ) {
        {
            let mut slot = self.color.lock();
            match slot.as_mut() {
                Some(buffer) if buffer.data.len() == pixels.len() => {
                    buffer.data.copy_from_slice(pixels);
                    buffer.format = format;
                    buffer.frame_number = frame_number;
                    buffer.timestamp_ms = timestamp_ms;
                }
                _ => {
                    debug!(len = pixels.len(), %format, "Allocating color buffer");
                    *slot = Some(ColorBuffer {
                        format,
                        data: pixels.to_vec(),
                        frame_number,
                        timestamp_ms,
                    });
                }
            }
        }
        *self.frame_info.lock() = Some(FrameInfo::new(frame_number, timestamp_ms));
        self.dirty.mark(BufferKind::Color);
    }

    /// Copy a depth frame into the store and wake the world worker.
    ///
    /// Returns the new depth generation.
    pub fn submit_depth(
        &self,
        format: DepthImageFormat,
        samples: &[u16],
        frame_number: u32,
        timestamp_ms: i64,
    ) -> u64 {
        {
            let mut slot = self.depth.lock();
            match slot.as_mut() {
                Some(buffer) if buffer.data.len() == samples.len() => {
                    buffer.data.copy_from_slice(samples);
                    buffer.format = format;
                    buffer.frame_number = frame_number;
                    buffer.timestamp_ms = timestamp_ms;
                }
                _ => {
                    debug!(len = samples.len(), %format, "Allocating depth buffer");
                    *slot = Some(DepthBuffer {
                        format,
                        data: samples.to_vec(),
                        frame_number,
                        timestamp_ms,
                    });
                }
            }
        }
        self.dirty.mark(BufferKind::Depth);

        let mut generation = self.depth_generation.lock();
        *generation += 1;
        self.depth_arrived.notify_all();
        *generation
    }

    /// Replace the skeleton records
    pub fn submit_skeletons(&self, skeletons: &[Skeleton]) {
        {
            let mut slot = self.skeletons.lock();
            slot.clear();
            slot.extend_from_slice(skeletons);
        }
        self.dirty.mark(BufferKind::Skeleton);
    }

    pub fn snapshot_color(&self) -> Option<ColorBuffer> {
        self.color.lock().clone()
    }

    pub fn snapshot_depth(&self) -> Option<DepthBuffer> {
        self.depth.lock().clone()
    }

    pub fn snapshot_skeletons(&self) -> Vec<Skeleton> {
        self.skeletons.lock().clone()
    }

    pub fn color_format(&self) -> Option<ColorImageFormat> {
        self.color.lock().as_ref().map(|b| b.format)
    }

    pub fn depth_format(&self) -> Option<DepthImageFormat> {
        self.depth.lock().as_ref().map(|b| b.format)
    }

    /// Copy the latest depth frame into `dest`, reusing its allocation.
    ///
    /// Returns false when no depth frame has been captured.
    pub fn copy_depth_into(&self, dest: &mut DepthBuffer) -> bool {
        let slot = self.depth.lock();
        let Some(buffer) = slot.as_ref() else {
            return false;
        };
        if dest.data.len() == buffer.data.len() {
            dest.data.copy_from_slice(&buffer.data);
        } else {
            dest.data = buffer.data.clone();
        }
        dest.format = buffer.format;
        dest.frame_number = buffer.frame_number;
        dest.timestamp_ms = buffer.timestamp_ms;
        true
    }

    pub fn frame_info(&self) -> Option<FrameInfo> {
        *self.frame_info.lock()
    }

    /// Number of depth frames submitted so far
    pub fn depth_generation(&self) -> u64 {
        *self.depth_generation.lock()
    }

    /// Wait until a depth frame newer than `seen` arrives.
    ///
    /// Returns the new generation, or `None` if `timeout` elapses first.
    pub fn wait_for_depth(&self, seen: u64, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut generation = self.depth_generation.lock();
        while *generation <= seen {
            if self
                .depth_arrived
                .wait_until(&mut generation, deadline)
                .timed_out()
            {
                break;
            }
        }
        (*generation > seen).then_some(*generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::ColorLayout;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_submit_reuses_allocation() {
        let store = FrameStore::new();
        let format = DepthImageFormat::new(2, 2);
        store.submit_depth(format, &[1, 2, 3, 4], 1, 0);
        let first = store.depth.lock().as_ref().map(|b| b.data.as_ptr()).unwrap();
        store.submit_depth(format, &[5, 6, 7, 8], 2, 33);
        let second = store.depth.lock().as_ref().map(|b| b.data.as_ptr()).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.snapshot_depth().unwrap().data, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_resize_reallocates() {
        let store = FrameStore::new();
        let format = ColorImageFormat::new(1, 1, ColorLayout::Bgra);
        store.submit_color(format, &[1, 2, 3, 4], 1, 0);
        let bigger = ColorImageFormat::new(2, 1, ColorLayout::Bgra);
        store.submit_color(bigger, &[9; 8], 2, 0);
        let color = store.snapshot_color().unwrap();
        assert_eq!(color.format, bigger);
        assert_eq!(color.data.len(), 8);
    }

    #[test]
    fn test_frame_info_follows_color() {
        let store = FrameStore::new();
        store.submit_depth(DepthImageFormat::new(1, 1), &[1000], 3, 100);
        assert!(store.frame_info().is_none());

        let format = ColorImageFormat::new(1, 1, ColorLayout::Bgra);
        store.submit_color(format, &[0; 4], 12, 2500);
        let info = store.frame_info().unwrap();
        assert_eq!(info.frame_number, 12);
        assert!((info.timestamp_seconds - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_wait_for_depth_wakes_on_submit() {
        let store = Arc::new(FrameStore::new());
        let producer = Arc::clone(&store);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.submit_depth(DepthImageFormat::new(1, 1), &[1000], 1, 0)
        });
        let generation = store.wait_for_depth(0, Duration::from_secs(5));
        assert_eq!(generation, Some(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_take_dirty_once_per_mark() {
        let store = FrameStore::new();
        assert!(!store.dirty().take(BufferKind::Depth));
        store.submit_depth(DepthImageFormat::new(1, 1), &[1000], 1, 0);
        assert!(store.dirty().take(BufferKind::Depth));
        assert!(!store.dirty().take(BufferKind::Depth));
        assert!(!store.dirty().is_dirty(BufferKind::Color));
    }

    #[test]
    fn test_wait_for_depth_times_out() {
        let store = FrameStore::new();
        assert_eq!(store.wait_for_depth(0, Duration::from_millis(10)), None);
    }
}
