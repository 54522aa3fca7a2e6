//! `beamline` - runs one device operation from the command line.
//!
//! Motion always goes through the simulated hardware provider. Without
//! `--dry-run` results are read from and persisted to the configured files
//! and scripts run under the configured interpreter.

use std::path::PathBuf;

use anyhow::{bail, Context};
use beamline_control::devices::crystal::CrystalController;
use beamline_control::devices::monochromator::MonochromatorController;
use beamline_control::devices::slit::SlitController;
use beamline_control::devices::xray_source::XRaySourceController;
use beamline_control::hardware::mock::SimulatedHardware;
use beamline_control::hardware::HexapodCoordinate;
use beamline_control::logging::init_tracing;
use beamline_control::{DeviceController, DeviceFactory, DeviceStatus, Settings};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

const DEFAULT_SETTINGS_PATH: &str = "beamline.toml";

#[derive(Parser, Debug)]
#[command(name = "beamline", about = "Beam line device control")]
struct Cli {
    /// Application settings file.
    #[arg(long, env = "BEAMLINE_SETTINGS", default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Keep results, persisted values and scripts in memory.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Connect a device and run one operation on it.
    Run {
        device: Device,
        /// Operation name, e.g. `home`, `move`, `align`, `check-flipped`.
        operation: String,
        /// Target for `move` operations.
        #[arg(long)]
        position: Option<f64>,
        /// Reuse the stored alignment instead of searching again.
        #[arg(long)]
        no_search: bool,
        /// Re-measure the bending angle before `miscut`.
        #[arg(long)]
        repeat_bending: bool,
    },
    /// Connect every device and print its status and positions.
    Status,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Device {
    Crystal,
    Monochromator,
    Slit,
    Autocollimator,
    XraySensor,
    XraySource,
}

/// Arguments of one `run` invocation.
#[derive(Debug, Clone)]
struct Request {
    operation: String,
    position: Option<f64>,
    search: bool,
    repeat_bending: bool,
}

impl Request {
    fn position(&self) -> anyhow::Result<f64> {
        self.position
            .with_context(|| format!("`{}` needs --position", self.operation))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let mut log = settings.log.clone();
    log.directory = settings.log_dir();
    init_tracing("cli", &log)?;

    let mut factory = if cli.dry_run {
        DeviceFactory::dry_run(settings, SimulatedHardware::new())?
    } else {
        DeviceFactory::new(settings, SimulatedHardware::new())
    };

    match cli.command.unwrap_or(Command::Status) {
        Command::Status => {
            let mut beamline = factory.build()?;
            beamline.start_all();
            for device in beamline.snapshot() {
                println!("{device}");
            }
            beamline.disconnect_all();
            Ok(())
        }
        Command::Run {
            device,
            operation,
            position,
            no_search,
            repeat_bending,
        } => {
            let request = Request {
                operation,
                position,
                search: !no_search,
                repeat_bending,
            };
            info!(?device, operation = %request.operation, "running");
            match device {
                Device::Crystal => run(&mut factory.crystal()?, &request, crystal),
                Device::Monochromator => {
                    run(&mut factory.monochromator()?, &request, monochromator)
                }
                Device::Slit => run(&mut factory.slit()?, &request, slit),
                Device::Autocollimator => run(&mut factory.autocollimator()?, &request, |d, r| {
                    single_stepper(r, |op, position| match op {
                        "move" => Some(d.move_to_position_stepper(position)),
                        "align-source-with-sensor" => Some(d.align_source_with_sensor()),
                        "setup-monochromator-bragg" => {
                            Some(d.setup_monochromator_bragg_peak_search())
                        }
                        "setup-crystal-bragg" => Some(d.setup_for_crystal_bragg_peak_search()),
                        _ => None,
                    })
                }),
                Device::XraySensor => run(&mut factory.xray_sensor()?, &request, |d, r| {
                    single_stepper(r, |op, position| match op {
                        "move" => Some(d.move_to_position_stepper(position)),
                        "align-source-with-sensor" => Some(d.align_source_with_sensor()),
                        "setup-monochromator-bragg" => {
                            Some(d.setup_monochromator_bragg_peak_search())
                        }
                        "setup-crystal-bragg" => Some(d.setup_for_crystal_bragg_peak_search()),
                        _ => None,
                    })
                }),
                Device::XraySource => run(&mut factory.xray_source()?, &request, xray_source),
            }
        }
    }
}

/// Connects `device`, runs the operation and reports the outcome.
fn run<C, F>(device: &mut C, request: &Request, operation: F) -> anyhow::Result<()>
where
    C: DeviceController,
    F: FnOnce(&mut C, &Request) -> anyhow::Result<bool>,
{
    let ok = match request.operation.as_str() {
        "start" => device.start(),
        "disconnect" => device.disconnect(),
        _ => {
            if !device.start() {
                report(device, "start");
                bail!("{} did not connect", C::KIND);
            }
            match request.operation.as_str() {
                "home" => device.go_home(),
                "stop" => device.stop(),
                _ => operation(device, request)?,
            }
        }
    };
    report(device, &request.operation);
    if !ok {
        bail!("{} {} failed", C::KIND, request.operation);
    }
    Ok(())
}

fn report<C: DeviceController>(device: &C, operation: &str) {
    match device.last_error() {
        Some(err) if device.status() == DeviceStatus::Error => {
            error!(device = %C::KIND, operation, error = %err, "operation failed");
            println!("{}: {} ({err})", C::KIND, device.fsm_state());
        }
        _ => println!("{}: {}", C::KIND, device.fsm_state()),
    }
}

fn unknown(request: &Request) -> anyhow::Error {
    anyhow::anyhow!("unknown operation `{}`", request.operation)
}

fn single_stepper<F>(request: &Request, operation: F) -> anyhow::Result<bool>
where
    F: FnOnce(&str, f64) -> Option<bool>,
{
    let position = if request.operation == "move" {
        request.position()?
    } else {
        0.0
    };
    operation(&request.operation, position).ok_or_else(|| unknown(request))
}

fn crystal(device: &mut CrystalController, request: &Request) -> anyhow::Result<bool> {
    Ok(match request.operation.as_str() {
        "move" => device.move_to_position_stepper(request.position()?),
        "move-hexapod-x" => {
            let mut target = HexapodCoordinate::new(
                device.position_x(),
                device.position_y(),
                device.position_z(),
                device.position_u(),
                device.position_v(),
                device.position_w(),
            );
            target.x = request.position()?;
            device.move_to_abs_position(target)
        }
        "align-source-with-sensor" => device.align_source_with_sensor(),
        "x-alignment" => device.x_axis_alignment(),
        "y-alignment" => device.y_axis_alignment(),
        "z-alignment" => device.z_axis_alignment(),
        "yw-alignment" => device.yw_axes_alignment(),
        "x-fine-alignment" => device.x_axis_fine_alignment(),
        "bragg-peak-search" => device.bragg_peak_search(),
        "y-fine-alignment" => device.y_axis_fine_alignment(),
        "check-flipped" => device.check_alignment_in_flipped_orientation(),
        "bending" => device.bending_angle_measurement(),
        "miscut" => device.miscut_angle_measurement(request.repeat_bending),
        "torsion" => device.torsion_angle_measurement(),
        _ => return Err(unknown(request)),
    })
}

fn monochromator(device: &mut MonochromatorController, request: &Request) -> anyhow::Result<bool> {
    Ok(match request.operation.as_str() {
        "move-linear" => device.move_to_position_stepper_linear(request.position()?),
        "move-rotational" => device.move_to_position_stepper_rotational(request.position()?),
        "align-source-with-sensor" => device.align_source_with_sensor(),
        "align" => device.align_monochromator(request.search),
        "bragg-peak-search" => device.search_monochromator_bragg_peak(),
        _ => return Err(unknown(request)),
    })
}

fn slit(device: &mut SlitController, request: &Request) -> anyhow::Result<bool> {
    Ok(match request.operation.as_str() {
        "move-linear" => device.move_to_position_stepper_linear(request.position()?),
        "move-rotational" => device.move_to_position_stepper_rotational(request.position()?),
        "align-source-with-sensor" => device.align_source_with_sensor(),
        "align" => device.align_slit(request.search),
        "park" => device.align_monochromator(),
        _ => return Err(unknown(request)),
    })
}

fn xray_source(device: &mut XRaySourceController, request: &Request) -> anyhow::Result<bool> {
    Ok(match request.operation.as_str() {
        "move" => device.move_to_position_stepper(request.position()?),
        "align-source-with-sensor" => device.align_source_with_sensor(request.search),
        "setup-monochromator-bragg" => device.setup_monochromator_bragg_peak_search(),
        "setup-crystal-bragg" => device.setup_for_crystal_bragg_peak_search(),
        _ => return Err(unknown(request)),
    })
}
