//! MG400 Daemon
//!
//! Activates the controller interface and polls it on fixed schedules:
//! - joint states from the realtime cache
//! - robot mode changes
//! - fault report while the robot is in ERROR mode
//! - interface health, with reactivation when a link drops
//!
//! Telemetry goes to stdout as JSON lines; logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use mg400::monitoring::system_time;
use mg400::{
    Config, FaultData, FaultReport, JointStateData, Mg400Interface, MonitorOutput, RobotMode,
    RobotModeData,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const REACTIVATE_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "mg400d")]
#[command(about = "MG400 daemon - realtime monitoring with automatic reconnection")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Controller IP address, overrides the configuration file
    #[arg(long)]
    ip: Option<String>,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("MG400_CONFIG").ok())
            .unwrap_or_else(|| "config/default_config.yaml".to_string())
    }
}

fn ticker(period_ms: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_millis(period_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Retry activation until it succeeds, deactivating between attempts.
///
/// Returns `false` when `shutdown` resolves first.
async fn activate_until_ready<F: Future>(interface: &Arc<Mg400Interface>, mut shutdown: Pin<&mut F>) -> bool {
    loop {
        let attempt = Arc::clone(interface);
        tokio::select! {
            result = tokio::task::spawn_blocking(move || attempt.activate()) => match result {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => warn!("Activation failed: {}", e),
                Err(e) => error!("Activation task failed: {}", e),
            },
            _ = shutdown.as_mut() => return false,
        }
        let stale = Arc::clone(interface);
        let _ = tokio::task::spawn_blocking(move || stale.deactivate()).await;
        info!("Try reconnecting in {}s...", REACTIVATE_DELAY.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(REACTIVATE_DELAY) => {}
            _ = shutdown.as_mut() => return false,
        }
    }
}

/// Query and report faults, then clear them on the controller.
async fn handle_faults(interface: &Arc<Mg400Interface>) -> Result<FaultReport> {
    let worker = Arc::clone(interface);
    tokio::task::spawn_blocking(move || -> mg400::Result<FaultReport> {
        let report = worker.fault_report()?;
        if !report.is_empty() {
            error!("Controller reported faults:\n{}", report);
            worker.dashboard.clear_error()?;
        }
        Ok(report)
    })
    .await
    .context("Fault query task failed")?
    .context("Fault query failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.get_config_path();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("MG400 Daemon");
    info!("{}", "=".repeat(50));
    info!("Using config: {}", config_path);

    let mut config = Config::load_from_path(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    if let Some(ip) = args.ip {
        config.robot.ip_address = ip;
    }
    info!("Connecting to {} ...", config.robot.ip_address);

    let polling = config.polling.clone();
    let mut monitor = MonitorOutput::new(
        (1000 / polling.joint_state_ms.max(1)) as u32,
        config.monitoring.dynamic,
        config.monitoring.decimal_places,
    );

    let mut interface = Mg400Interface::new(config);
    interface.configure().context("Failed to configure interface")?;
    let interface = Arc::new(interface);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ready = activate_until_ready(&interface, shutdown.as_mut()).await;
    if ready {
        info!("MG400 ready");
    }

    let mut joint_timer = ticker(polling.joint_state_ms);
    let mut mode_timer = ticker(polling.robot_mode_ms);
    let mut error_timer = ticker(polling.error_check_ms);
    let mut check_timer = ticker(polling.interface_check_ms);

    while ready {
        tokio::select! {
            _ = joint_timer.tick() => {
                if interface.ok() {
                    let joints = interface.realtime.current_joint_states();
                    let pose = interface.realtime.current_end_pose();
                    if monitor.should_output_joint_state(joints, &pose) {
                        let data = JointStateData::new_rounded(joints, &pose, system_time(), monitor.decimal_places);
                        monitor.output_joint_state(&data);
                    }
                }
            }
            _ = mode_timer.tick() => {
                if interface.ok() {
                    if let Some(mode) = interface.realtime.robot_mode() {
                        if monitor.should_output_robot_mode(mode) {
                            monitor.output_robot_mode(&RobotModeData::new(mode, system_time()));
                        }
                    }
                }
            }
            _ = error_timer.tick() => {
                if !interface.ok() {
                    continue;
                }
                let report = if interface.realtime.is_robot_mode(RobotMode::Error) {
                    match handle_faults(&interface).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!("{:#}", e);
                            continue;
                        }
                    }
                } else {
                    FaultReport::default()
                };
                if monitor.should_output_fault(&report) {
                    monitor.output_fault(&FaultData::from_report(&report, system_time()));
                }
            }
            _ = check_timer.tick() => {
                if !interface.ok() {
                    if let Some(fatal) = interface.realtime.take_fatal() {
                        error!("{}", fatal);
                    }
                    warn!("MG400 interface unhealthy, reactivating");
                    let stale = Arc::clone(&interface);
                    let _ = tokio::task::spawn_blocking(move || stale.deactivate()).await;
                    ready = activate_until_ready(&interface, shutdown.as_mut()).await;
                    if ready {
                        info!("MG400 ready");
                    }
                }
            }
            _ = shutdown.as_mut() => {
                ready = false;
            }
        }
    }
    info!("Shutdown requested");

    let stale = Arc::clone(&interface);
    tokio::task::spawn_blocking(move || stale.deactivate())
        .await
        .context("Failed during shutdown")?;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn unreachable_interface() -> Arc<Mg400Interface> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = Config::for_ip("127.0.0.1");
        config.robot.ports.dashboard = port;
        config.robot.ports.motion = port;
        config.robot.ports.realtime = port;
        config.connection.connect_timeout_ms = 100;
        Arc::new(Mg400Interface::new(config))
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reactivation() {
        let interface = unreachable_interface();
        let shutdown = tokio::time::sleep(Duration::from_millis(300));
        tokio::pin!(shutdown);

        let ready = tokio::time::timeout(
            Duration::from_secs(2),
            activate_until_ready(&interface, shutdown.as_mut()),
        )
        .await
        .expect("shutdown did not end the retry loop");
        assert!(!ready);
    }
}
