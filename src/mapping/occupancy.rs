//! Occupancy grid synthesis
//!
//! The published grid is rebuilt from scratch out of the best particle's
//! trajectory: every stored reading is registered into a fresh working
//! [`ScanGrid`], which is then thresholded into unknown/free/occupied cells.

use super::engine::TrajectoryNode;
use super::scan_grid::{BeamModel, ScanGrid};
use crate::common::types::{Pose2D, Stamp};
use crate::config::MapParams;
use rclrs::log_debug;

const LOGGER_NAME: &str = "slam_gmapping.occupancy";

pub const UNKNOWN_CELL: i8 = -1;
pub const FREE_CELL: i8 = 0;
pub const OCCUPIED_CELL: i8 = 100;

/// Grid geometry, published alongside the grid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapMetaData {
    pub resolution: f64,
    pub width: u32,
    pub height: u32,
    /// Pose of cell (0, 0) in the map frame
    pub origin: Pose2D,
}

/// Row-major tri-state grid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OccupancyGrid {
    pub frame_id: String,
    pub stamp: Stamp,
    pub info: MapMetaData,
    pub data: Vec<i8>,
}

impl OccupancyGrid {
    pub fn at(&self, x: u32, y: u32) -> Option<i8> {
        if x >= self.info.width || y >= self.info.height {
            return None;
        }
        self.data
            .get((y as usize) * (self.info.width as usize) + x as usize)
            .copied()
    }
}

/// Threshold a cell probability. Negative means unknown; anything above
/// `occ_thresh` is occupied.
pub fn rasterize_cell(occ: f64, occ_thresh: f64) -> i8 {
    debug_assert!(occ <= 1.0, "cell probability {} exceeds 1", occ);
    if occ < 0.0 {
        UNKNOWN_CELL
    } else if occ > occ_thresh {
        OCCUPIED_CELL
    } else {
        FREE_CELL
    }
}

/// Rebuilds the published grid from a trajectory.
#[derive(Debug, Clone)]
pub struct OccupancyGridSynthesizer {
    frame_id: String,
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    delta: f64,
    occ_thresh: f64,
    update_interval: Stamp,
    initial: MapParams,
    grid: OccupancyGrid,
    got_map: bool,
    last_update: Stamp,
}

impl OccupancyGridSynthesizer {
    pub fn new(params: &MapParams, frame_id: &str, update_interval: Stamp) -> Self {
        OccupancyGridSynthesizer {
            frame_id: frame_id.to_string(),
            xmin: params.xmin,
            ymin: params.ymin,
            xmax: params.xmax,
            ymax: params.ymax,
            delta: params.delta,
            occ_thresh: params.occ_thresh,
            update_interval,
            initial: params.clone(),
            grid: OccupancyGrid::default(),
            got_map: false,
            last_update: 0,
        }
    }

    /// Whether a scan stamped `stamp` should trigger a rebuild.
    pub fn needs_rebuild(&self, stamp: Stamp) -> bool {
        !self.got_map || stamp - self.last_update > self.update_interval
    }

    pub fn got_map(&self) -> bool {
        self.got_map
    }

    /// Current world extent `(xmin, ymin, xmax, ymax)`
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.xmin, self.ymin, self.xmax, self.ymax)
    }

    /// Last grid, if one with non-zero size has been built.
    pub fn map(&self) -> Option<&OccupancyGrid> {
        if self.got_map && self.grid.info.width > 0 && self.grid.info.height > 0 {
            Some(&self.grid)
        } else {
            None
        }
    }

    /// Rebuild the grid from a leaf-to-root trajectory.
    pub fn rebuild<'a, I>(
        &mut self,
        trajectory: I,
        beams: &BeamModel,
        scan_stamp: Stamp,
        now: Stamp,
    ) -> &OccupancyGrid
    where
        I: IntoIterator<Item = &'a TrajectoryNode>,
    {
        if !self.got_map {
            self.grid.info.resolution = self.delta;
            self.grid.info.origin = Pose2D::default();
        }

        let mut working = ScanGrid::new(self.xmin, self.ymin, self.xmax, self.ymax, self.delta);

        for node in trajectory {
            log_debug!(
                LOGGER_NAME,
                "  {:.3} {:.3} {:.3}",
                node.pose.x,
                node.pose.y,
                node.pose.theta
            );
            let Some(reading) = &node.reading else {
                log_debug!(LOGGER_NAME, "Reading is empty");
                continue;
            };
            working.invalidate_active_area();
            working.compute_active_area(beams, &node.pose, &reading.ranges);
            working.register_scan(beams, &node.pose, &reading.ranges);
        }

        let width = working.size_x() as u32;
        let height = working.size_y() as u32;
        let wmin = working.map_to_world(0, 0);
        let wmax = working.map_to_world(working.size_x(), working.size_y());
        self.xmin = wmin.0;
        self.ymin = wmin.1;
        self.xmax = wmax.0;
        self.ymax = wmax.1;
        self.grid.info.origin = Pose2D::new(self.xmin, self.ymin, 0.0);

        if self.grid.info.width != width || self.grid.info.height != height {
            log_debug!(
                LOGGER_NAME,
                "map size is now {}x{} pixels ({:.3},{:.3})-({:.3}, {:.3})",
                width,
                height,
                self.xmin,
                self.ymin,
                self.xmax,
                self.ymax
            );

            self.grid.info.width = width;
            self.grid.info.height = height;
            self.grid
                .data
                .resize(width as usize * height as usize, UNKNOWN_CELL);
        }

        for y in 0..working.size_y() {
            for x in 0..working.size_x() {
                let index = y as usize * width as usize + x as usize;
                self.grid.data[index] = rasterize_cell(working.cell(x, y), self.occ_thresh);
            }
        }

        self.got_map = true;
        self.last_update = scan_stamp;
        self.grid.stamp = now;
        self.grid.frame_id = self.frame_id.clone();
        &self.grid
    }

    /// Forget the grid and restore the configured extent.
    pub fn reset(&mut self) {
        let initial = self.initial.clone();
        *self = Self::new(&initial, &self.frame_id.clone(), self.update_interval);
    }
}
