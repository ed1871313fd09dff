use serde::{Deserialize, Serialize};
use worldview_registry::LodLimits;

/// Step function from projected size to LOD index.
///
/// Projected size is `bounding_len / distance`. Anything bigger than
/// `thresholds[0]` gets LOD -1, bigger than `thresholds[1]` LOD 0, bigger
/// than `thresholds[2]` LOD 1, and LOD 2 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LodPolicy {
    pub thresholds: [f32; 3],
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self {
            thresholds: [0.6, 0.16, 0.03],
        }
    }
}

impl LodPolicy {
    pub fn new(thresholds: [f32; 3]) -> Self {
        Self { thresholds }
    }

    /// Unclamped LOD for a projected size.
    pub fn lod_for_projected_len(&self, proj_len: f32) -> i32 {
        let [t0, t1, t2] = self.thresholds;
        if proj_len > t0 {
            -1
        } else if proj_len > t1 {
            0
        } else if proj_len > t2 {
            1
        } else {
            2
        }
    }

    /// LOD for an entity at `dist`, clamped to its limits.
    pub fn lod_for(&self, bounding_len: f32, dist: f64, limits: LodLimits) -> i32 {
        if dist <= f64::EPSILON {
            return limits.clamp_lod(i32::MIN);
        }
        let proj_len = (bounding_len as f64 / dist) as f32;
        limits.clamp_lod(self.lod_for_projected_len(proj_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBJECT: LodLimits = LodLimits {
        min_lod: 0,
        max_lod: 2,
        max_model_lod: 2,
    };

    #[test]
    fn steps_follow_thresholds() {
        let policy = LodPolicy::default();
        assert_eq!(policy.lod_for_projected_len(1.0), -1);
        assert_eq!(policy.lod_for_projected_len(0.5), 0);
        assert_eq!(policy.lod_for_projected_len(0.1), 1);
        assert_eq!(policy.lod_for_projected_len(0.01), 2);
    }

    #[test]
    fn boundaries_fall_to_the_coarser_level() {
        let policy = LodPolicy::default();
        assert_eq!(policy.lod_for_projected_len(0.6), 0);
        assert_eq!(policy.lod_for_projected_len(0.03), 2);
    }

    #[test]
    fn clamped_by_limits() {
        let policy = LodPolicy::default();
        // 10 / 5 = 2.0 would be -1, but the object has no -1 level.
        assert_eq!(policy.lod_for(10.0, 5.0, OBJECT), 0);
        let with_negative = LodLimits {
            min_lod: -1,
            ..OBJECT
        };
        assert_eq!(policy.lod_for(10.0, 5.0, with_negative), -1);
        assert_eq!(policy.lod_for(1.0, 1000.0, OBJECT), 2);
    }

    #[test]
    fn zero_distance_is_finest() {
        let policy = LodPolicy::default();
        assert_eq!(policy.lod_for(0.0, 0.0, OBJECT), 0);
    }
}
