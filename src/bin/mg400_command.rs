//! MG400 Command Client
//!
//! Command-line interface for issuing a single dashboard or motion command
//! to an MG400 controller and printing the result.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mg400::{
    Config, DashboardChannel, DigitalLevel, DoIndex, JogAxis, Mg400Interface, MotionChannel,
    MoveOutcome, Pose,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command line arguments for the MG400 command client
#[derive(Parser)]
#[command(name = "mg400-command")]
#[command(about = "Send a single command to an MG400 controller")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Controller IP address, overrides the configuration file
    #[arg(long, global = true)]
    ip: Option<String>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: text, json
    #[arg(long, default_value = "text", global = true)]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enable the robot
    Enable,
    /// Disable the robot
    Disable,
    /// Clear controller errors
    ClearError,
    /// Stop the current motion and reset the robot
    Reset,
    /// Trigger an emergency stop
    EmergencyStop,
    /// Print the robot mode
    Mode,
    /// Print joint angles in radians
    Angle,
    /// Print the tool pose in meters and radians
    Pose,
    /// Print active fault ids per joint
    Errors,
    /// Set the global speed ratio (1-100)
    SpeedFactor { ratio: u8 },
    /// Set a digital output
    Do {
        index: u8,
        #[arg(long)]
        high: bool,
    },
    /// Jog along an axis (J1+, X-, ...) for a fixed duration
    Jog {
        axis: String,
        #[arg(long, default_value = "500")]
        duration_ms: u64,
    },
    /// Point-to-point move to x y z (meters) and yaw (radians)
    MovJ { x: f64, y: f64, z: f64, r: f64 },
    /// Linear move to x y z (meters) and yaw (radians), waiting for completion
    MovL {
        x: f64,
        y: f64,
        z: f64,
        r: f64,
        #[arg(long, default_value = "5")]
        timeout_secs: u64,
    },
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let path = self
            .config
            .clone()
            .or_else(|| std::env::var("MG400_CONFIG").ok());

        let mut config = match (path, &self.ip) {
            (Some(path), _) => Config::load_from_path(&path)
                .with_context(|| format!("Failed to load config from {}", path))?,
            (None, Some(ip)) => Config::for_ip(ip),
            (None, None) => bail!("Either --config, MG400_CONFIG or --ip is required"),
        };
        if let Some(ip) = &self.ip {
            config.robot.ip_address = ip.clone();
        }
        Ok(config)
    }

    fn json(&self) -> bool {
        self.format == "json"
    }
}

fn dashboard(config: &Config) -> Result<DashboardChannel> {
    let channel = DashboardChannel::new(
        &config.robot.ip_address,
        config.robot.ports.dashboard,
        &config.connection,
    );
    channel
        .connect()
        .with_context(|| format!("Failed to connect to dashboard at {}", config.robot.ip_address))?;
    Ok(channel)
}

fn motion(config: &Config) -> Result<MotionChannel> {
    let channel = MotionChannel::new(
        &config.robot.ip_address,
        config.robot.ports.motion,
        &config.connection,
    );
    channel.start()?;
    let deadline = Instant::now() + config.connection.connect_timeout() * 2;
    while !channel.is_connected() {
        if Instant::now() >= deadline {
            bail!("Motion port on {} did not accept a connection", config.robot.ip_address);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(channel)
}

fn print_done(args: &Args, command: &str) {
    if args.json() {
        println!("{}", json!({ "command": command, "status": "ok" }));
    } else {
        println!("{}: ok", command);
    }
}

fn print_pose(args: &Args, pose: &Pose) {
    if args.json() {
        println!("{}", json!({ "pose": pose, "quaternion": pose.quaternion() }));
    } else {
        println!(
            "x={:.4} y={:.4} z={:.4} roll={:.4} pitch={:.4} yaw={:.4}",
            pose.x, pose.y, pose.z, pose.roll, pose.pitch, pose.yaw
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "mg400=debug,info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let config = args.load_config()?;
    if args.verbose {
        info!("Target controller: {}", config.robot.ip_address);
    }

    match &args.command {
        Commands::Enable => {
            dashboard(&config)?.enable_robot()?;
            print_done(&args, "EnableRobot");
        }
        Commands::Disable => {
            dashboard(&config)?.disable_robot()?;
            print_done(&args, "DisableRobot");
        }
        Commands::ClearError => {
            dashboard(&config)?.clear_error()?;
            print_done(&args, "ClearError");
        }
        Commands::Reset => {
            dashboard(&config)?.reset_robot()?;
            print_done(&args, "ResetRobot");
        }
        Commands::EmergencyStop => {
            dashboard(&config)?.emergency_stop()?;
            print_done(&args, "EmergencyStop");
        }
        Commands::Mode => {
            let mode = dashboard(&config)?.robot_mode()?;
            if args.json() {
                println!("{}", json!({ "robot_mode": mode.raw(), "robot_mode_name": mode.name() }));
            } else {
                println!("{} ({})", mode, mode.raw());
            }
        }
        Commands::Angle => {
            let angles = dashboard(&config)?.get_angle()?;
            if args.json() {
                println!("{}", json!({ "joint_positions": angles }));
            } else {
                for (i, q) in angles.iter().enumerate() {
                    println!("J{}: {:.4} rad", i + 1, q);
                }
            }
        }
        Commands::Pose => {
            let pose = dashboard(&config)?.get_pose()?;
            print_pose(&args, &pose);
        }
        Commands::Errors => {
            let table = dashboard(&config)?.get_error_id()?;
            if args.json() {
                let slots: Vec<&[i64]> = (0..mg400::robot::JOINT_SLOTS).map(|i| table.joint(i)).collect();
                println!("{}", json!({ "error_ids": slots }));
            } else if !table.has_faults() {
                println!("No faults");
            } else {
                for (joint, ids) in table.faults() {
                    println!("Joint{}: {:?}", joint + 1, ids);
                }
            }
        }
        Commands::SpeedFactor { ratio } => {
            dashboard(&config)?.speed_factor(*ratio)?;
            print_done(&args, "SpeedFactor");
        }
        Commands::Do { index, high } => {
            dashboard(&config)?.digital_output(DoIndex::new(*index)?, DigitalLevel::from(*high))?;
            print_done(&args, "DO");
        }
        Commands::Jog { axis, duration_ms } => {
            let axis: JogAxis = axis.parse()?;
            let channel = motion(&config)?;
            channel.move_jog(Some(axis))?;
            tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
            channel.move_jog(None)?;
            channel.stop();
            print_done(&args, "MoveJog");
        }
        Commands::MovJ { x, y, z, r } => {
            let channel = motion(&config)?;
            channel.mov_j(&Pose::planar(*x, *y, *z, *r))?;
            channel.stop();
            print_done(&args, "MovJ");
        }
        Commands::MovL { x, y, z, r, timeout_secs } => {
            let mut interface = Mg400Interface::new(config);
            interface.configure()?;
            interface.activate().context("Failed to activate interface")?;

            // Give the realtime reader a moment to cache the first frame.
            let deadline = Instant::now() + Duration::from_secs(1);
            while interface.realtime.robot_mode().is_none() && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            let target = Pose::planar(*x, *y, *z, *r);
            let outcome = interface
                .move_linear_and_wait(target, Duration::from_secs(*timeout_secs))
                .await?;
            interface.deactivate();

            match outcome {
                MoveOutcome::Reached(pose) => print_pose(&args, &pose),
                MoveOutcome::Rejected(reason) => bail!("MovL rejected: {:?}", reason),
                MoveOutcome::Aborted { reason, last_pose } => {
                    print_pose(&args, &last_pose);
                    bail!("MovL aborted: {:?}", reason);
                }
            }
        }
    }

    Ok(())
}
