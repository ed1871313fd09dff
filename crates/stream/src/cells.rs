use std::collections::{HashSet, VecDeque};

use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};
use worldview_common::Aabb;

use crate::grid::{CellCoord, cells_within};

/// Query-cell streaming configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellQueryConfig {
    pub cell_width: f64,
    /// Cells with centres within this distance of the camera get queried.
    pub load_distance: f64,
    /// Maximum number of cells to request per frame.
    pub max_queries_per_frame: usize,
}

impl Default for CellQueryConfig {
    fn default() -> Self {
        Self {
            cell_width: 200.0,
            load_distance: 1000.0,
            max_queries_per_frame: 64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStats {
    pub queried_this_frame: usize,
    pub total_queried: usize,
    pub backlog: usize,
}

/// Tracks which query cells have been asked about on the current connection.
pub struct CellProximity {
    pub config: CellQueryConfig,
    queried: HashSet<CellCoord>,
    /// Cells in range but not yet requested, nearest first.
    backlog: VecDeque<CellCoord>,
    last_cell: Option<CellCoord>,
    stats: CellStats,
}

impl CellProximity {
    pub fn new(config: CellQueryConfig) -> Self {
        Self {
            config,
            queried: HashSet::new(),
            backlog: VecDeque::new(),
            last_cell: None,
            stats: CellStats::default(),
        }
    }

    /// Forget everything queried so far and mark the cells around `campos`
    /// as covered by the initial bounding-box query.
    ///
    /// Returns the box to send with that query.
    pub fn set_camera_for_new_connection(&mut self, campos: DVec3) -> Aabb {
        self.queried.clear();
        self.backlog.clear();
        let cells = cells_within(campos, self.config.load_distance, self.config.cell_width);
        self.queried.extend(cells);
        self.last_cell = Some(CellCoord::containing(campos, self.config.cell_width));
        self.stats = CellStats {
            total_queried: self.queried.len(),
            ..CellStats::default()
        };

        let half = (self.config.load_distance + self.config.cell_width) as f32;
        let centre = campos.as_vec3();
        Aabb::new(centre - Vec3::splat(half), centre + Vec3::splat(half))
    }

    /// Cells that should be queried this frame, nearest first.
    ///
    /// Each returned cell is marked queried; at most
    /// `max_queries_per_frame` are returned and the rest wait for later frames.
    pub fn update(&mut self, campos: DVec3) -> Vec<CellCoord> {
        let cell = CellCoord::containing(campos, self.config.cell_width);
        if self.last_cell != Some(cell) {
            self.last_cell = Some(cell);
            self.backlog = cells_within(campos, self.config.load_distance, self.config.cell_width)
                .into_iter()
                .filter(|c| !self.queried.contains(c))
                .collect();
        }

        let mut out = Vec::new();
        while out.len() < self.config.max_queries_per_frame {
            let Some(c) = self.backlog.pop_front() else {
                break;
            };
            if self.queried.insert(c) {
                out.push(c);
            }
        }

        if !out.is_empty() {
            tracing::debug!(count = out.len(), backlog = self.backlog.len(), "querying cells");
        }
        self.stats = CellStats {
            queried_this_frame: out.len(),
            total_queried: self.queried.len(),
            backlog: self.backlog.len(),
        };
        out
    }

    pub fn is_queried(&self, coord: CellCoord) -> bool {
        self.queried.contains(&coord)
    }

    pub fn stats(&self) -> &CellStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(max: usize) -> CellQueryConfig {
        CellQueryConfig {
            cell_width: 100.0,
            load_distance: 150.0,
            max_queries_per_frame: max,
        }
    }

    #[test]
    fn config_defaults() {
        let config = CellQueryConfig::default();
        assert_eq!(config.cell_width, 200.0);
        assert_eq!(config.load_distance, 1000.0);
        assert_eq!(config.max_queries_per_frame, 64);
    }

    #[test]
    fn new_connection_covers_surrounding_cells() {
        let mut cells = CellProximity::new(small_config(100));
        let aabb = cells.set_camera_for_new_connection(DVec3::new(50.0, 50.0, 50.0));
        assert_eq!(aabb.min, Vec3::splat(-200.0));
        assert_eq!(aabb.max, Vec3::splat(300.0));
        assert!(cells.is_queried(CellCoord::new(0, 0, 0)));
        // Nothing new until the camera moves.
        assert!(cells.update(DVec3::new(50.0, 50.0, 50.0)).is_empty());
    }

    #[test]
    fn moving_queries_only_new_cells() {
        let mut cells = CellProximity::new(small_config(100));
        cells.set_camera_for_new_connection(DVec3::new(50.0, 50.0, 50.0));
        let fresh = cells.update(DVec3::new(150.0, 50.0, 50.0));
        assert!(!fresh.is_empty());
        assert!(fresh.contains(&CellCoord::new(2, 0, 0)));
        assert!(!fresh.contains(&CellCoord::new(0, 0, 0)));

        // Moving back asks for nothing.
        assert!(cells.update(DVec3::new(50.0, 50.0, 50.0)).is_empty());
    }

    #[test]
    fn per_frame_cap_spills_into_later_frames() {
        let mut cells = CellProximity::new(small_config(2));
        let campos = DVec3::new(50.0, 50.0, 50.0);
        let first = cells.update(campos);
        assert_eq!(first, [CellCoord::new(0, 0, 0), CellCoord::new(-1, 0, 0)]);
        // Own cell, 6 faces and 12 edges are in range; corners are not.
        assert_eq!(cells.stats().backlog, 17);

        let mut total = first.len();
        loop {
            let batch = cells.update(campos);
            if batch.is_empty() {
                break;
            }
            assert!(batch.len() <= 2);
            total += batch.len();
        }
        assert_eq!(total, 19);
    }

    #[test]
    fn reconnect_resets_queried_cells() {
        let mut cells = CellProximity::new(small_config(100));
        cells.update(DVec3::new(5000.0, 0.0, 0.0));
        assert!(cells.stats().total_queried > 0);
        cells.set_camera_for_new_connection(DVec3::new(50.0, 50.0, 50.0));
        assert!(!cells.is_queried(CellCoord::new(50, 0, 0)));
    }
}
