use glam::DVec3;

/// A cubic cell of the server's object query grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The cell containing `pos`.
    pub fn containing(pos: DVec3, cell_width: f64) -> Self {
        Self {
            x: (pos.x / cell_width).floor() as i32,
            y: (pos.y / cell_width).floor() as i32,
            z: (pos.z / cell_width).floor() as i32,
        }
    }

    pub fn centre(&self, cell_width: f64) -> DVec3 {
        (DVec3::new(self.x as f64, self.y as f64, self.z as f64) + 0.5) * cell_width
    }

    pub fn to_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Every cell whose centre lies within `radius` of `pos`, nearest first.
pub fn cells_within(pos: DVec3, radius: f64, cell_width: f64) -> Vec<CellCoord> {
    assert!(cell_width > 0.0, "cell_width must be positive");
    let centre = CellCoord::containing(pos, cell_width);
    let r = (radius / cell_width).ceil() as i32 + 1;
    let radius2 = radius * radius;

    let mut result: Vec<(f64, CellCoord)> = Vec::new();
    for dx in -r..=r {
        for dy in -r..=r {
            for dz in -r..=r {
                let coord = CellCoord::new(centre.x + dx, centre.y + dy, centre.z + dz);
                let d2 = coord.centre(cell_width).distance_squared(pos);
                if d2 <= radius2 {
                    result.push((d2, coord));
                }
            }
        }
    }
    result.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    result.into_iter().map(|(_, c)| c).collect()
}
