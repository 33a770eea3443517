// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing pipeline
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │    Sensor    │ ──▶ │  FrameStore  │ ──▶ │  WorldProjector  │
//! │ color/depth/ │     │ latest frame │     │ depth → XYZW,    │
//! │  skeletons   │     │  per kind    │     │ double-buffered  │
//! └──────────────┘     └──────┬───────┘     └────────┬─────────┘
//!                             │                      │
//!                             ▼                      ▼
//!                    ┌──────────────────┐   ┌──────────────────┐
//!                    │ RegistrationMap  │   │ BufferPublisher  │
//!                    │ depth → color    │   │ bounded reads    │
//!                    └────────┬─────────┘   └──────────────────┘
//!                             ▼
//!                    ┌──────────────────┐
//!                    │ Correspondence   │
//!                    │ board corners →  │
//!                    │ depth + world    │
//!                    └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`store`]: latest-value frame storage and dirty flags
//! - [`registration`]: depth-to-color tables and their inverse
//! - [`double_buffer`]: two-slot buffer with atomic selector
//! - [`world`]: background depth-to-world transform
//! - [`publisher`]: bounded-wait buffer publication
//! - [`calibration`]: chessboard corner correspondences
//! - [`skeleton`]: per-field skeleton lists
//! - [`export`]: LAS point cloud export
//! - [`runtime`]: the session tying it all together

pub mod calibration;
pub mod double_buffer;
pub mod export;
pub mod publisher;
pub mod registration;
pub mod runtime;
pub mod skeleton;
pub mod store;
pub mod world;

pub use calibration::{Corner, CornerDetector, CorrespondenceFinder, depth_mm_to_meters};
pub use double_buffer::DoubleBuffer;
pub use publisher::{BufferPublisher, PresentSummary, PresentationSink, Published};
pub use registration::{InverseRegistrationTable, RegistrationMapper, RegistrationTable};
pub use runtime::{Pipeline, STATUS_OK};
pub use store::{BufferKind, ColorBuffer, DepthBuffer, FrameInfo, FrameStore};
pub use world::{WorldBuffer, WorldProjector, WorldTexel};
