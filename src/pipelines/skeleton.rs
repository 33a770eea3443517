// SPDX-License-Identifier: GPL-3.0-only

//! Column-wise view of skeleton records
//!
//! Consumers that bind per-field lists (one list of tracking ids, one of
//! positions, one list of joints per body) get them from [`split`].

use crate::backends::sensor::{JointTrackingState, JointType, Skeleton, TrackingState, WorldPoint};
use serde::Serialize;

/// Skeleton fields split into parallel lists, one entry per body slot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SkeletonSplit {
    pub tracking_ids: Vec<u32>,
    pub tracking_states: Vec<TrackingState>,
    pub positions: Vec<WorldPoint>,
    pub joint_types: Vec<Vec<JointType>>,
    pub joint_positions: Vec<Vec<WorldPoint>>,
    pub joint_states: Vec<Vec<JointTrackingState>>,
}

impl SkeletonSplit {
    /// Number of body slots
    pub fn len(&self) -> usize {
        self.tracking_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracking_ids.is_empty()
    }

    /// Slots with a tracked body
    pub fn tracked_count(&self) -> usize {
        self.tracking_states
            .iter()
            .filter(|s| **s == TrackingState::Tracked)
            .count()
    }
}

/// Split skeleton records into per-field lists, keeping slot order
pub fn split(skeletons: &[Skeleton]) -> SkeletonSplit {
    let mut out = SkeletonSplit::default();
    for skeleton in skeletons {
        out.tracking_ids.push(skeleton.tracking_id);
        out.tracking_states.push(skeleton.tracking_state);
        out.positions.push(skeleton.position);
        out.joint_types
            .push(skeleton.joints.iter().map(|j| j.joint_type).collect());
        out.joint_positions
            .push(skeleton.joints.iter().map(|j| j.position).collect());
        out.joint_states
            .push(skeleton.joints.iter().map(|j| j.tracking_state).collect());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::SyntheticScene;

    #[test]
    fn test_split_keeps_slots() {
        let skeletons = SyntheticScene::default().skeletons();
        let split = split(&skeletons);
        assert_eq!(split.len(), skeletons.len());
        assert_eq!(split.tracked_count(), 1);
        assert_eq!(split.tracking_ids[0], 1);
        assert_eq!(split.joint_types[0].len(), 20);
        assert_eq!(split.joint_types[0][3], JointType::Head);
        assert!(split.joint_positions[1].is_empty());
    }
}
