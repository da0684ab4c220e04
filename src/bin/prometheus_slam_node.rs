use anyhow::{Error, Result};
use nav_msgs::srv::{GetMap, GetMap_Request};
use prometheus_slam::common::types::SystemClock;
use prometheus_slam::lifecycle::LifecycleNode;
use prometheus_slam::mapping::OdometryParticleFilter;
use prometheus_slam::publisher::PublishLoop;
use prometheus_slam::ros::{self, RosMapSink, TfBroadcaster};
use prometheus_slam::transform::TfBuffer;
use prometheus_slam::{ScanOutcome, SlamGmapping, SlamParams};
use rclrs::{
    log_debug, log_error, log_info, Context, CreateBasicExecutor, Node, RclrsErrorFilter,
    SpinOptions, QOS_PROFILE_DEFAULT,
};
use sensor_msgs::msg::LaserScan;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const LOGGER_NAME: &str = "slam_gmapping.node";

struct SlamGmappingNode {
    slam: Arc<SlamGmapping>,
    node: Arc<Node>,
    scan_subscription: Mutex<Option<Arc<rclrs::Subscription<LaserScan>>>>,
    map_service: Mutex<Option<Arc<rclrs::Service<GetMap>>>>,
    // Dropped before the runtime it runs on.
    publish_loop: Mutex<Option<PublishLoop>>,
    _runtime: tokio::runtime::Runtime,
}

impl SlamGmappingNode {
    pub fn new(executor: &rclrs::Executor, name: &str) -> Result<Arc<Self>> {
        let node = executor.create_node(name)?;
        let params = SlamParams::from_node(&node)?;

        let tf = TfBuffer::new(Duration::from_secs_f64(params.timing.tf_cache_time));
        spawn_tf_listener(Arc::clone(&tf));

        let publish_period = Duration::from_secs_f64(params.timing.transform_publish_period);
        let slam = Arc::new(SlamGmapping::new(
            params,
            tf,
            Box::new(OdometryParticleFilter::new()),
            Arc::new(RosMapSink::new(&node)?),
            Arc::new(SystemClock),
        )?);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()?;
        let broadcaster = Arc::new(TfBroadcaster::new(&node)?);
        let publish_loop = Arc::new(slam.correction_publisher(broadcaster))
            .spawn(publish_period, runtime.handle());

        let slam_node = Arc::new(SlamGmappingNode {
            slam,
            node,
            scan_subscription: None.into(),
            map_service: None.into(),
            publish_loop: Mutex::new(publish_loop),
            _runtime: runtime,
        });

        let slam = Arc::clone(&slam_node.slam);
        let scan_subscription = slam_node.node.create_subscription::<LaserScan, _>(
            "scan",
            QOS_PROFILE_DEFAULT,
            move |msg: LaserScan| {
                let scan = ros::range_scan_from_msg(&msg);
                match slam.handle_scan(&scan) {
                    ScanOutcome::Processed { map_updated } => {
                        log_debug!(LOGGER_NAME, "Scan processed, map updated: {}", map_updated)
                    }
                    outcome => log_debug!(LOGGER_NAME, "Scan not processed: {:?}", outcome),
                }
            },
        )?;
        if let Ok(mut slot) = slam_node.scan_subscription.lock() {
            *slot = Some(scan_subscription);
        }

        let slam = Arc::clone(&slam_node.slam);
        let map_service = slam_node.node.create_service::<GetMap, _>(
            "dynamic_map",
            move |_header: &rclrs::rmw_request_id_t, _request: GetMap_Request| {
                ros::get_map_response(slam.map_request())
            },
        )?;
        if let Ok(mut slot) = slam_node.map_service.lock() {
            *slot = Some(map_service);
        }

        slam_node.slam.on_configure()?;
        slam_node.slam.on_activate()?;

        Ok(slam_node)
    }

    fn shutdown(&self) {
        if let Ok(mut slot) = self.publish_loop.lock() {
            if let Some(publish_loop) = slot.take() {
                publish_loop.stop();
            }
        }
        if let Err(e) = self
            .slam
            .on_deactivate()
            .and_then(|_| self.slam.on_cleanup())
        {
            log_error!(LOGGER_NAME, "Shutdown failed: {}", e);
        }
    }
}

/// Feed `tf` from its own executor, so lookups that wait inside the scan
/// callback can still see new transforms arrive.
fn spawn_tf_listener(tf: Arc<TfBuffer>) {
    thread::spawn(move || {
        let run = || -> Result<(), Error> {
            let mut executor = Context::default_from_env()?.create_basic_executor();
            let node = executor.create_node("slam_gmapping_tf_listener")?;
            let _subscriptions = tf.subscribe(&node)?;
            executor
                .spin(SpinOptions::default())
                .first_error()
                .map_err(|err| err.into())
        };
        if let Err(e) = run() {
            log_error!(LOGGER_NAME, "TF listener stopped: {}", e);
        }
    });
}

fn main() -> Result<(), Error> {
    let mut executor = Context::default_from_env()?.create_basic_executor();

    let slam_node = SlamGmappingNode::new(&executor, "slam_gmapping")?;
    log_info!(LOGGER_NAME, "slam_gmapping started, waiting for scans");

    let result = executor
        .spin(SpinOptions::default())
        .first_error()
        .map_err(|err| err.into());

    slam_node.shutdown();
    result
}
