//! Working grid used while synthesizing the map
//!
//! Cells count how often a beam passed through them and how often a beam
//! ended in them. Storage is split into 32x32 patches that are only
//! allocated once a reading's active area touches them, so a large initial
//! extent costs nothing until it is observed. The grid grows in whole
//! patches when a reading reaches past its edge.

use crate::common::types::{Point2D, Pose2D};
use std::collections::BTreeSet;

/// Patch side is `1 << PATCH_MAGNITUDE` cells.
pub const PATCH_MAGNITUDE: u32 = 5;
const PATCH_SIZE: i32 = 1 << PATCH_MAGNITUDE;
const PATCH_MASK: i32 = PATCH_SIZE - 1;

/// Hit/visit counter of one cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointAccumulator {
    hits: u32,
    visits: u32,
}

impl PointAccumulator {
    pub fn update(&mut self, occupied: bool) {
        if occupied {
            self.hits += 1;
        }
        self.visits += 1;
    }

    /// Occupancy probability, or -1 if never observed.
    pub fn value(&self) -> f64 {
        if self.visits == 0 {
            -1.0
        } else {
            f64::from(self.hits) / f64::from(self.visits)
        }
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn visits(&self) -> u32 {
        self.visits
    }
}

/// Beam layout and range limits used to register readings.
#[derive(Debug, Clone)]
pub struct BeamModel {
    angles: Vec<f64>,
    max_range: f64,
    usable_range: f64,
}

impl BeamModel {
    pub fn new(angles: Vec<f64>, max_range: f64, usable_range: f64) -> Self {
        BeamModel {
            angles,
            max_range,
            usable_range,
        }
    }

    /// World endpoints of the valid beams, and whether each one hit
    /// something. Beams beyond max range, zero or NaN are skipped; beams
    /// beyond the usable range are cut short and do not count as hits.
    fn endpoints<'a>(
        &'a self,
        pose: &'a Pose2D,
        ranges: &'a [f64],
    ) -> impl Iterator<Item = (Point2D, bool)> + 'a {
        self.angles
            .iter()
            .zip(ranges)
            .filter(move |&(_, &r)| !(r.is_nan() || r == 0.0 || r > self.max_range))
            .map(move |(&angle, &r)| {
                let d = r.min(self.usable_range);
                let (s, c) = (pose.theta + angle).sin_cos();
                ((pose.x + d * c, pose.y + d * s), r < self.usable_range)
            })
    }
}

/// Cells on the segment from `start` to `end`, both included.
pub fn grid_line(start: (i32, i32), end: (i32, i32)) -> Vec<(i32, i32)> {
    let (x0, y0) = start;
    let (x1, y1) = end;
    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };

    let mut cells = Vec::with_capacity((dx.max(dy) + 1) as usize);
    let (mut x, mut y) = (x0, y0);
    let mut err = dx - dy;

    loop {
        cells.push((x, y));
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }
    }

    cells
}

type Patch = Box<[PointAccumulator]>;

fn new_patch() -> Patch {
    vec![PointAccumulator::default(); (PATCH_SIZE * PATCH_SIZE) as usize].into_boxed_slice()
}

fn patches_for(cells: i32) -> i32 {
    (cells + PATCH_MASK) >> PATCH_MAGNITUDE
}

#[derive(Debug, Clone)]
pub struct ScanGrid {
    center: Point2D,
    delta: f64,
    size_x: i32,
    size_y: i32,
    /// Cell index of `center`
    half_x: i32,
    half_y: i32,
    patches_x: i32,
    patches_y: i32,
    patches: Vec<Option<Patch>>,
    active: BTreeSet<(i32, i32)>,
}

impl ScanGrid {
    /// Grid covering `[xmin, xmax] x [ymin, ymax]`, with cell (0, 0)
    /// centered on `(xmin, ymin)`.
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64, delta: f64) -> Self {
        let size_x = (((xmax - xmin) / delta).round() as i32).max(1);
        let size_y = (((ymax - ymin) / delta).round() as i32).max(1);
        let patches_x = patches_for(size_x);
        let patches_y = patches_for(size_y);
        let half_x = size_x >> 1;
        let half_y = size_y >> 1;

        ScanGrid {
            center: (
                xmin + f64::from(half_x) * delta,
                ymin + f64::from(half_y) * delta,
            ),
            delta,
            size_x,
            size_y,
            half_x,
            half_y,
            patches_x,
            patches_y,
            patches: vec![None; (patches_x * patches_y) as usize],
            active: BTreeSet::new(),
        }
    }

    pub fn size_x(&self) -> i32 {
        self.size_x
    }

    pub fn size_y(&self) -> i32 {
        self.size_y
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn world_to_map(&self, p: Point2D) -> (i32, i32) {
        (
            ((p.0 - self.center.0) / self.delta).round() as i32 + self.half_x,
            ((p.1 - self.center.1) / self.delta).round() as i32 + self.half_y,
        )
    }

    pub fn map_to_world(&self, x: i32, y: i32) -> Point2D {
        (
            f64::from(x - self.half_x) * self.delta + self.center.0,
            f64::from(y - self.half_y) * self.delta + self.center.1,
        )
    }

    pub fn is_inside(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.size_x && y < self.size_y
    }

    fn locate(&self, x: i32, y: i32) -> Option<(usize, usize)> {
        if !self.is_inside(x, y) {
            return None;
        }
        let patch = ((y >> PATCH_MAGNITUDE) * self.patches_x + (x >> PATCH_MAGNITUDE)) as usize;
        let offset = ((y & PATCH_MASK) * PATCH_SIZE + (x & PATCH_MASK)) as usize;
        Some((patch, offset))
    }

    pub fn accumulator(&self, x: i32, y: i32) -> Option<&PointAccumulator> {
        let (patch, offset) = self.locate(x, y)?;
        self.patches[patch].as_ref().map(|p| &p[offset])
    }

    /// Occupancy of a cell; -1 if unobserved or outside the grid.
    pub fn cell(&self, x: i32, y: i32) -> f64 {
        self.accumulator(x, y).map_or(-1.0, PointAccumulator::value)
    }

    fn accumulator_mut(&mut self, x: i32, y: i32) -> Option<&mut PointAccumulator> {
        let (patch, offset) = self.locate(x, y)?;
        self.patches[patch].as_mut().map(|p| &mut p[offset])
    }

    /// Number of allocated patches
    pub fn allocated_patches(&self) -> usize {
        self.patches.iter().filter(|p| p.is_some()).count()
    }

    pub fn active_area_len(&self) -> usize {
        self.active.len()
    }

    pub fn invalidate_active_area(&mut self) {
        self.active.clear();
    }

    /// Enlarge the grid in whole patches until the inclusive cell box
    /// `(xmin, ymin)..=(xmax, ymax)` is inside. Existing cells keep their
    /// world position.
    pub fn grow(&mut self, xmin: i32, ymin: i32, xmax: i32, ymax: i32) {
        let grow_low = |min: i32| if min < 0 { patches_for(-min) } else { 0 };
        let grow_high = |max: i32, size: i32| {
            if max >= size {
                patches_for(max - size + 1)
            } else {
                0
            }
        };

        let low_x = grow_low(xmin);
        let low_y = grow_low(ymin);
        let high_x = grow_high(xmax, self.size_x);
        let high_y = grow_high(ymax, self.size_y);
        if low_x == 0 && low_y == 0 && high_x == 0 && high_y == 0 {
            return;
        }

        let size_x = self.size_x + (low_x + high_x) * PATCH_SIZE;
        let size_y = self.size_y + (low_y + high_y) * PATCH_SIZE;
        let patches_x = patches_for(size_x);
        let patches_y = patches_for(size_y);
        let mut patches: Vec<Option<Patch>> = vec![None; (patches_x * patches_y) as usize];

        for py in 0..self.patches_y {
            for px in 0..self.patches_x {
                let old = (py * self.patches_x + px) as usize;
                let new = ((py + low_y) * patches_x + px + low_x) as usize;
                patches[new] = self.patches[old].take();
            }
        }

        self.active = self
            .active
            .iter()
            .map(|&(px, py)| (px + low_x, py + low_y))
            .collect();
        self.patches = patches;
        self.patches_x = patches_x;
        self.patches_y = patches_y;
        self.size_x = size_x;
        self.size_y = size_y;
        self.half_x += low_x * PATCH_SIZE;
        self.half_y += low_y * PATCH_SIZE;
    }

    /// Mark the patches the reading sweeps over and allocate them, growing
    /// the grid first if the reading reaches past its edge.
    pub fn compute_active_area(&mut self, beams: &BeamModel, pose: &Pose2D, ranges: &[f64]) {
        let ends: Vec<Point2D> = beams.endpoints(pose, ranges).map(|(p, _)| p).collect();

        let origin = self.world_to_map((pose.x, pose.y));
        let (mut min, mut max) = (origin, origin);
        for &p in &ends {
            let c = self.world_to_map(p);
            min = (min.0.min(c.0), min.1.min(c.1));
            max = (max.0.max(c.0), max.1.max(c.1));
        }
        if !self.is_inside(min.0, min.1) || !self.is_inside(max.0, max.1) {
            self.grow(min.0, min.1, max.0, max.1);
        }

        let origin = self.world_to_map((pose.x, pose.y));
        self.active
            .insert((origin.0 >> PATCH_MAGNITUDE, origin.1 >> PATCH_MAGNITUDE));
        for &p in &ends {
            for (x, y) in grid_line(origin, self.world_to_map(p)) {
                self.active.insert((x >> PATCH_MAGNITUDE, y >> PATCH_MAGNITUDE));
            }
        }

        for &(px, py) in &self.active {
            if px < 0 || py < 0 || px >= self.patches_x || py >= self.patches_y {
                continue;
            }
            let slot = &mut self.patches[(py * self.patches_x + px) as usize];
            if slot.is_none() {
                *slot = Some(new_patch());
            }
        }
    }

    /// Add the reading's evidence: cells crossed by a beam are visited,
    /// the end cell of a beam that hit something is visited and hit.
    pub fn register_scan(&mut self, beams: &BeamModel, pose: &Pose2D, ranges: &[f64]) {
        let origin = self.world_to_map((pose.x, pose.y));

        for (end, hit) in beams.endpoints(pose, ranges) {
            let end = self.world_to_map(end);
            let line = grid_line(origin, end);

            for &(x, y) in &line[..line.len() - 1] {
                if let Some(cell) = self.accumulator_mut(x, y) {
                    cell.update(false);
                }
            }
            if hit {
                if let Some(cell) = self.accumulator_mut(end.0, end.1) {
                    cell.update(true);
                }
            }
        }
    }
}
