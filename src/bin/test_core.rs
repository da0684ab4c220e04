use nalgebra::{Isometry3, Vector3};
use prometheus_slam::common::types::{stamp_from_secs, Stamp, SystemClock};
use prometheus_slam::lifecycle::LifecycleNode;
use prometheus_slam::mapping::{MapMetaData, OccupancyGrid, OdometryParticleFilter};
use prometheus_slam::perception::RangeScan;
use prometheus_slam::transform::{StampedTransform, TfBuffer};
use prometheus_slam::{MapOutput, ScanOutcome, SlamGmapping, SlamParams};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const ROOM_HALF_WIDTH: f64 = 4.0;
const ROOM_HALF_HEIGHT: f64 = 3.0;
const BEAMS: usize = 181;

struct PrintingOutput;

impl MapOutput for PrintingOutput {
    fn publish_map(&self, grid: &OccupancyGrid) {
        let occupied = grid.data.iter().filter(|&&c| c == 100).count();
        let free = grid.data.iter().filter(|&&c| c == 0).count();
        println!(
            "Map {}x{} @ {:.2} m: {} occupied, {} free",
            grid.info.width, grid.info.height, grid.info.resolution, occupied, free
        );
    }

    fn publish_metadata(&self, info: &MapMetaData) {
        println!(
            "Map origin: ({:.2}, {:.2})",
            info.origin.x, info.origin.y
        );
    }

    fn publish_entropy(&self, entropy: f64) {
        println!("Pose entropy: {:.3}", entropy);
    }
}

/// Distance from (x, y) along `angle` to the walls of the room.
fn cast_ray(x: f64, y: f64, angle: f64) -> f64 {
    let (s, c) = angle.sin_cos();
    let mut best = f64::INFINITY;
    if c.abs() > 1e-9 {
        let wall = if c > 0.0 { ROOM_HALF_WIDTH } else { -ROOM_HALF_WIDTH };
        best = best.min((wall - x) / c);
    }
    if s.abs() > 1e-9 {
        let wall = if s > 0.0 { ROOM_HALF_HEIGHT } else { -ROOM_HALF_HEIGHT };
        best = best.min((wall - y) / s);
    }
    best
}

fn make_scan(x: f64, stamp: Stamp) -> RangeScan {
    let angle_min = -std::f64::consts::FRAC_PI_2;
    let angle_increment = std::f64::consts::PI / (BEAMS - 1) as f64;
    RangeScan {
        frame_id: "laser".to_string(),
        stamp,
        angle_min,
        angle_max: -angle_min,
        angle_increment,
        range_min: 0.1,
        range_max: 10.0,
        ranges: (0..BEAMS)
            .map(|i| cast_ray(x, 0.0, angle_min + i as f64 * angle_increment))
            .collect(),
    }
}

fn main() {
    println!("Running offline SLAM on a synthetic room...");

    let mut params = SlamParams::default();
    let mut overrides = HashMap::new();
    overrides.insert("xmin".to_string(), -5.0);
    overrides.insert("ymin".to_string(), -5.0);
    overrides.insert("xmax".to_string(), 5.0);
    overrides.insert("ymax".to_string(), 5.0);
    overrides.insert("particles".to_string(), 10.0);
    overrides.insert("linearUpdate".to_string(), 0.2);
    overrides.insert("map_update_interval".to_string(), 2.0);
    overrides.insert("transform_wait".to_string(), 0.0);
    overrides.insert("seed".to_string(), 42.0);
    if let Err(e) = params.configure(&overrides) {
        println!("Invalid parameters: {}", e);
        return;
    }

    let tf = TfBuffer::new(Duration::from_secs(60));
    tf.set_transform(
        StampedTransform {
            parent_frame: "base_link".to_string(),
            child_frame: "laser".to_string(),
            stamp: 0,
            transform: Isometry3::identity(),
        },
        true,
    );

    let slam = match SlamGmapping::new(
        params,
        tf.clone(),
        Box::new(OdometryParticleFilter::new()),
        Arc::new(PrintingOutput),
        Arc::new(SystemClock),
    ) {
        Ok(slam) => slam,
        Err(e) => {
            println!("Failed to create SLAM node: {}", e);
            return;
        }
    };

    if let Err(e) = slam.on_configure().and_then(|_| slam.on_activate()) {
        println!("Failed to start SLAM node: {}", e);
        return;
    }

    for step in 0..17 {
        let x = -2.0 + 0.25 * step as f64;
        let stamp = stamp_from_secs(1.0 + step as f64);
        tf.set_transform(
            StampedTransform {
                parent_frame: "odom".to_string(),
                child_frame: "base_link".to_string(),
                stamp,
                transform: Isometry3::new(Vector3::new(x, 0.0, 0.0), Vector3::zeros()),
            },
            false,
        );

        match slam.handle_scan(&make_scan(x, stamp)) {
            ScanOutcome::Processed { map_updated } => {
                println!("Scan {} at x={:.2}: processed (map updated: {})", step, x, map_updated)
            }
            outcome => println!("Scan {} at x={:.2}: {:?}", step, x, outcome),
        }
    }

    if let Some(pose) = slam.best_pose() {
        println!(
            "Best pose: x={:.3}, y={:.3}, theta={:.3}",
            pose.x, pose.y, pose.theta
        );
    }
    let correction = slam.correction().current();
    println!(
        "map -> odom: ({:.3}, {:.3})",
        correction.translation.x, correction.translation.y
    );

    match slam.map_request() {
        Some(map) => println!("Final map has {} cells", map.data.len()),
        None => println!("No map was built"),
    }

    match slam.on_deactivate().and_then(|_| slam.on_cleanup()) {
        Ok(_) => println!("SLAM node shut down"),
        Err(e) => println!("Failed to shut down: {}", e),
    }
}
