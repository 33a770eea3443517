// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for depth sensors
//!
//! The pipeline consumes sensors through the capability traits in
//! [`sensor`], so hardware drivers and the synthetic test sensor are
//! interchangeable.

pub mod sensor;
