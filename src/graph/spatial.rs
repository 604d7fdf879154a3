//! Uniform grid index over points, for radius queries.
//!
//! Terminal repair only ever asks "which segment start points lie within
//! r metres of this end point", so a hash grid with cell size r answers it by
//! scanning the 3×3 block of cells around the query.

use std::collections::HashMap;

use crate::types::Point;

/// Point index bucketed into square cells.
#[derive(Debug, Clone)]
pub struct PointGrid {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
    points: Vec<Point>,
}

impl PointGrid {
    /// Build a grid over `points`; item ids are positions in the slice.
    ///
    /// `cell_size` should equal the largest radius that will be queried.
    pub fn new(points: Vec<Point>, cell_size: f64) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            cells.entry(Self::cell_of(p, cell_size)).or_default().push(i);
        }
        Self { cell_size, cells, points }
    }

    fn cell_of(p: &Point, cell_size: f64) -> (i64, i64) {
        ((p.x / cell_size).floor() as i64, (p.y / cell_size).floor() as i64)
    }

    /// Items within `radius` of `query`, as (item, distance), sorted by
    /// distance then item.
    pub fn within(&self, query: &Point, radius: f64) -> Vec<(usize, f64)> {
        let (cx, cy) = Self::cell_of(query, self.cell_size);
        let reach = (radius / self.cell_size).ceil().max(1.0) as i64;

        let mut hits = Vec::new();
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                if let Some(items) = self.cells.get(&(cx + dx, cy + dy)) {
                    for &i in items {
                        let d = self.points[i].distance(query);
                        if d <= radius {
                            hits.push((i, d));
                        }
                    }
                }
            }
        }
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the grid is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
