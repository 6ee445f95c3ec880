use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::info;

use maestro_usc as usc;
use usb_transport::{MockDevice, UsbTransport};

#[derive(Parser, Debug)]
#[command(
    name = "maestro",
    version,
    about = "Maestro USB servo controller CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use the in-process mock device instead of real hardware
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    /// Channel count of the mock device
    #[arg(long, value_enum, default_value_t = Model::Mini12, global = true)]
    mock_model: Model,

    /// Select a controller by USB serial number
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Session config file (YAML or JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print prometheus transfer counters when done
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Model {
    Micro6,
    Mini12,
    Mini18,
    Mini24,
}

impl Model {
    fn product_id(self) -> u16 {
        match self {
            Model::Micro6 => 0x0089,
            Model::Mini12 => 0x008A,
            Model::Mini18 => 0x008B,
            Model::Mini24 => 0x008C,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Facet {
    Variables,
    Servos,
    Stack,
    CallStack,
}

impl From<Facet> for usc::StatusKind {
    fn from(f: Facet) -> Self {
        match f {
            Facet::Variables => usc::StatusKind::Variables,
            Facet::Servos => usc::StatusKind::Servos,
            Facet::Stack => usc::StatusKind::Stack,
            Facet::CallStack => usc::StatusKind::CallStack,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached controllers
    List,
    /// Show model, channel count and firmware version
    Info,
    /// Read or write the stored settings
    #[command(subcommand)]
    Settings(SettingsCmd),
    /// Print one facet of the runtime state as JSON
    Status {
        #[arg(value_enum, default_value = "variables")]
        facet: Facet,
    },
    /// Set a channel target
    Target {
        channel: u8,
        /// Quarter-microseconds, or microseconds with --us
        value: f64,
        #[arg(long, action = ArgAction::SetTrue)]
        us: bool,
    },
    /// Set a channel speed limit (0 = unlimited)
    Speed { channel: u8, value: u16 },
    /// Set a channel acceleration limit (0 = unlimited)
    Accel { channel: u8, value: u16 },
    /// Script memory and execution
    #[command(subcommand)]
    Script(ScriptCmd),
    /// Drive the PWM output (12/18/24-channel models)
    Pwm { duty_cycle: u16, period: u16 },
    /// Switch the PWM output off
    PwmOff,
    /// Reload settings on the device
    Reinit,
    /// Reset the device to factory settings
    RestoreDefaults,
    /// Clear the error register
    ClearErrors,
    /// Reboot into the firmware bootloader
    Bootloader,
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
    /// Read settings and print them, or save them with --out
    Read {
        #[arg(long)]
        out: Option<String>,
    },
    /// Write settings from a YAML or JSON snapshot, then reinitialize
    Apply {
        file: String,
        /// Also upload the snapshot's compiled program
        #[arg(long, action = ArgAction::SetTrue)]
        upload_script: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ScriptCmd {
    Erase,
    /// Upload a compiled program (JSON)
    Upload {
        file: String,
        /// Store the program checksum on the device
        #[arg(long, action = ArgAction::SetTrue)]
        checksum: bool,
    },
    /// Restart the script, optionally at a subroutine with a parameter
    Restart {
        #[arg(long)]
        subroutine: Option<u8>,
        #[arg(long, requires = "subroutine", allow_hyphen_values = true)]
        parameter: Option<i16>,
    },
    Run,
    Stop,
    Step,
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => usc::load_session_config(path)?,
        None => usc::SessionConfig::default(),
    };
    let hub = usc::MetricsHub::new().map_err(anyhow::Error::msg)?;

    if cli.mock {
        let filter = usb_transport::DeviceFilter {
            product_ids: vec![cli.mock_model.product_id()],
            ..usc::device_filter(cli.serial.as_deref())
        };
        run::<MockDevice>(&cli, &filter, config, &hub)?;
    } else {
        run_hardware(&cli, config, &hub)?;
    }

    if cli.metrics {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

#[cfg(feature = "libusb")]
fn run_hardware(cli: &Cli, config: usc::SessionConfig, hub: &usc::MetricsHub) -> Result<()> {
    let filter = usc::device_filter(cli.serial.as_deref());
    run::<usb_transport::LibusbDevice>(cli, &filter, config, hub)
}

#[cfg(not(feature = "libusb"))]
fn run_hardware(_cli: &Cli, _config: usc::SessionConfig, _hub: &usc::MetricsHub) -> Result<()> {
    anyhow::bail!("built without the libusb feature; pass --mock or rebuild with --features libusb")
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn run<T: UsbTransport>(
    cli: &Cli,
    filter: &usb_transport::DeviceFilter,
    config: usc::SessionConfig,
    hub: &usc::MetricsHub,
) -> Result<()> {
    if let Commands::List = cli.command {
        for dev in T::list(filter)? {
            println!(
                "{:04x}:{:04x}\t{}\tbus {} addr {}",
                dev.vendor_id,
                dev.product_id,
                dev.serial.as_deref().unwrap_or("-"),
                dev.bus,
                dev.address
            );
        }
        return Ok(());
    }

    let transport = T::open(filter).context("opening controller")?;
    let mut session = usc::DeviceSession::new(transport, config)?.with_metrics(hub);

    match &cli.command {
        Commands::List => {}
        Commands::Info => {
            let variant = *session.variant();
            let version = session.firmware_version()?;
            println!("product id:   0x{:04X}", variant.product_id);
            println!("channels:     {}", variant.servo_count);
            println!("script bytes: {}", variant.max_script_length);
            println!("firmware:     {version}");
        }
        Commands::Settings(SettingsCmd::Read { out }) => {
            let settings = session.read_usc_settings()?;
            match out {
                Some(path) => {
                    usc::save_settings_file(path, &settings)?;
                    info!(path = %path, "saved settings");
                }
                None => println!("{}", serde_json::to_string_pretty(&settings)?),
            }
        }
        Commands::Settings(SettingsCmd::Apply {
            file,
            upload_script,
        }) => {
            let settings = usc::load_settings_file(file)?;
            let diagnostics = session.apply_usc_settings(&settings, *upload_script)?;
            for d in &diagnostics {
                eprintln!("warning: {d}");
            }
            session.reinitialize()?;
        }
        Commands::Status { facet } => {
            let report = session.read_status((*facet).into())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Target { channel, value, us } => {
            let target = if *us {
                usc::microseconds_to_position(*value)
            } else {
                value.round().clamp(0.0, f64::from(u16::MAX)) as u16
            };
            session.set_target(*channel, target)?;
        }
        Commands::Speed { channel, value } => session.set_speed(*channel, *value)?,
        Commands::Accel { channel, value } => session.set_acceleration(*channel, *value)?,
        Commands::Script(cmd) => script_command(&mut session, cmd)?,
        Commands::Pwm { duty_cycle, period } => session.set_pwm(*duty_cycle, *period)?,
        Commands::PwmOff => session.disable_pwm()?,
        Commands::Reinit => session.reinitialize()?,
        Commands::RestoreDefaults => session.restore_default_configuration()?,
        Commands::ClearErrors => session.clear_errors()?,
        Commands::Bootloader => session.start_bootloader()?,
    }
    Ok(())
}

fn script_command<T: UsbTransport>(
    session: &mut usc::DeviceSession<T>,
    cmd: &ScriptCmd,
) -> Result<()> {
    match cmd {
        ScriptCmd::Erase => session.erase_script()?,
        ScriptCmd::Upload { file, checksum } => {
            let program = usc::load_program_file(file)?;
            session.upload_script(&program, *checksum)?;
            println!("uploaded {} bytes", program.byte_code.len());
        }
        ScriptCmd::Restart {
            subroutine: Some(sub),
            parameter: Some(p),
        } => session.restart_script_at_subroutine_with_parameter(*sub, *p)?,
        ScriptCmd::Restart {
            subroutine: Some(sub),
            parameter: None,
        } => session.restart_script_at_subroutine(*sub)?,
        ScriptCmd::Restart {
            subroutine: None, ..
        } => session.restart_script()?,
        ScriptCmd::Run => session.set_script_done(usc::ScriptState::Run)?,
        ScriptCmd::Stop => session.set_script_done(usc::ScriptState::Stop)?,
        ScriptCmd::Step => session.set_script_done(usc::ScriptState::Step)?,
    }
    Ok(())
}
