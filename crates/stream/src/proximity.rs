use glam::DVec3;
use serde::{Deserialize, Serialize};
use worldview_common::EntityKey;
use worldview_registry::Loadable;

use crate::lod::LodPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Everything closer than this is in proximity regardless of size.
    pub load_everything_dist: f64,
    /// Farther entities need a projected size above this.
    pub min_projected_len: f32,
    pub lod_thresholds: [f32; 3],
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            load_everything_dist: 150.0,
            min_projected_len: 0.05,
            lod_thresholds: LodPolicy::default().thresholds,
        }
    }
}

/// What the viewer has to do about one entity after a proximity pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Became eligible; load at `lod`.
    Entered { key: EntityKey, lod: i32 },
    /// No longer eligible; release everything it holds.
    Left { key: EntityKey },
    /// Still eligible but wants a different LOD.
    LodChanged { key: EntityKey, from: i32, to: i32 },
}

impl Transition {
    pub fn key(&self) -> EntityKey {
        match self {
            Transition::Entered { key, .. }
            | Transition::Left { key }
            | Transition::LodChanged { key, .. } => *key,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProximityStats {
    pub considered: usize,
    pub in_proximity: usize,
    pub entered: usize,
    pub left: usize,
    pub lod_changed: usize,
}

/// Per-frame proximity and LOD classification.
pub struct ProximityTracker {
    config: ProximityConfig,
    policy: LodPolicy,
    stats: ProximityStats,
}

impl ProximityTracker {
    pub fn new(config: ProximityConfig) -> Self {
        let policy = LodPolicy::new(config.lod_thresholds);
        Self {
            config,
            policy,
            stats: ProximityStats::default(),
        }
    }

    pub fn config(&self) -> &ProximityConfig {
        &self.config
    }

    pub fn policy(&self) -> &LodPolicy {
        &self.policy
    }

    /// Stats from the last [`update`](Self::update).
    pub fn stats(&self) -> &ProximityStats {
        &self.stats
    }

    /// Classify one entity without touching its state.
    ///
    /// Returns `(in_proximity, lod)`.
    pub fn classify(&self, campos: DVec3, entity: &dyn Loadable) -> (bool, i32) {
        let dist2 = campos.distance_squared(entity.centroid());
        let dist = dist2.sqrt();
        let len = entity.bounding_len();
        let near = self.config.load_everything_dist;
        let in_proximity = if dist2 <= near * near {
            true
        } else {
            (len as f64 / dist) > self.config.min_projected_len as f64
        };
        (in_proximity, self.policy.lod_for(len, dist, entity.lod_limits()))
    }

    /// Run one pass over `entities`, updating their `in_proximity` and
    /// `current_lod` and returning the transitions to act on.
    pub fn update<'a>(
        &mut self,
        campos: DVec3,
        entities: impl IntoIterator<Item = &'a mut dyn Loadable>,
    ) -> Vec<Transition> {
        let _span = tracing::info_span!("proximity_update").entered();
        let mut stats = ProximityStats::default();
        let mut transitions = Vec::new();

        for entity in entities {
            stats.considered += 1;
            let (now_in, lod) = self.classify(campos, entity);
            let key = entity.entity_key();
            let state = entity.load_state_mut();
            let was_in = state.in_proximity;

            match (was_in, now_in) {
                (false, true) => {
                    tracing::debug!(%key, lod, "entered proximity");
                    state.in_proximity = true;
                    state.current_lod = lod;
                    stats.entered += 1;
                    transitions.push(Transition::Entered { key, lod });
                }
                (true, false) => {
                    tracing::debug!(%key, "left proximity");
                    state.in_proximity = false;
                    stats.left += 1;
                    transitions.push(Transition::Left { key });
                }
                (true, true) if lod != state.current_lod => {
                    let from = state.current_lod;
                    tracing::trace!(%key, from, to = lod, "lod changed");
                    state.current_lod = lod;
                    stats.lod_changed += 1;
                    transitions.push(Transition::LodChanged { key, from, to: lod });
                }
                _ => {}
            }
            if now_in {
                stats.in_proximity += 1;
            }
        }

        self.stats = stats;
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use worldview_common::{Aabb, EntityId};
    use worldview_protocol::ObjectData;
    use worldview_registry::WorldObject;

    fn object(uid: u64, x: f64, half: f32) -> WorldObject {
        let pos = DVec3::new(x, 0.0, 0.0);
        WorldObject::new(
            EntityId(uid),
            ObjectData {
                model_url: "m.bmesh".into(),
                pos,
                scale: Vec3::ONE,
                aabb_ws: Aabb::around(pos, half),
                max_model_lod_level: 2,
                ..ObjectData::default()
            },
        )
    }

    fn run(tracker: &mut ProximityTracker, campos: DVec3, obs: &mut [WorldObject]) -> Vec<Transition> {
        tracker.update(campos, obs.iter_mut().map(|o| o as &mut dyn Loadable))
    }

    #[test]
    fn near_objects_are_always_in() {
        let mut tracker = ProximityTracker::new(ProximityConfig::default());
        // 0.2 long at 100 away: projected 0.002, but inside the near radius.
        let mut obs = [object(1, 100.0, 0.1)];
        let t = run(&mut tracker, DVec3::ZERO, &mut obs);
        assert_eq!(t.len(), 1);
        assert!(matches!(t[0], Transition::Entered { lod: 2, .. }));
        assert!(obs[0].state.in_proximity);
    }

    #[test]
    fn small_distant_objects_are_dropped() {
        let mut tracker = ProximityTracker::new(ProximityConfig::default());
        // 2 long at 500 away: 0.004 projected.
        let mut small = [object(1, 500.0, 1.0)];
        assert!(run(&mut tracker, DVec3::ZERO, &mut small).is_empty());
        // 60 long at 500 away: 0.12 projected.
        let mut big = [object(2, 500.0, 30.0)];
        let t = run(&mut tracker, DVec3::ZERO, &mut big);
        assert_eq!(
            t,
            [Transition::Entered {
                key: EntityKey::Object(EntityId(2)),
                lod: 1
            }]
        );
    }

    #[test]
    fn one_transition_per_crossing() {
        let mut tracker = ProximityTracker::new(ProximityConfig::default());
        let mut obs = [object(1, 10.0, 1.0)];
        assert_eq!(run(&mut tracker, DVec3::ZERO, &mut obs).len(), 1);
        assert!(run(&mut tracker, DVec3::ZERO, &mut obs).is_empty());

        let far = DVec3::new(5000.0, 0.0, 0.0);
        let t = run(&mut tracker, far, &mut obs);
        assert_eq!(t, [Transition::Left { key: EntityKey::Object(EntityId(1)) }]);
        assert!(!obs[0].state.in_proximity);
        assert!(run(&mut tracker, far, &mut obs).is_empty());
        assert_eq!(tracker.stats().in_proximity, 0);
    }

    #[test]
    fn lod_changes_while_in_proximity() {
        let mut tracker = ProximityTracker::new(ProximityConfig::default());
        // 4 long: at 5 away projected 0.8 (clamped to 0), at 100 away 0.04 (1).
        let mut obs = [object(1, 0.0, 2.0)];
        run(&mut tracker, DVec3::new(5.0, 0.0, 0.0), &mut obs);
        assert_eq!(obs[0].state.current_lod, 0);

        let t = run(&mut tracker, DVec3::new(100.0, 0.0, 0.0), &mut obs);
        assert_eq!(
            t,
            [Transition::LodChanged {
                key: EntityKey::Object(EntityId(1)),
                from: 0,
                to: 1
            }]
        );
        assert_eq!(tracker.stats().lod_changed, 1);
    }

    #[test]
    fn stats_count_everything_considered() {
        let mut tracker = ProximityTracker::new(ProximityConfig::default());
        let mut obs = [object(1, 0.0, 1.0), object(2, 900.0, 1.0), object(3, 50.0, 1.0)];
        run(&mut tracker, DVec3::ZERO, &mut obs);
        let stats = tracker.stats();
        assert_eq!(stats.considered, 3);
        assert_eq!(stats.in_proximity, 2);
        assert_eq!(stats.entered, 2);
    }
}
