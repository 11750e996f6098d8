use anyhow::{Context, Result, anyhow};
use burnr_core::config::FlashConfig;
use burnr_core::device::DeviceDescriptor;
use burnr_core::flash::{Flasher, Outcome};
use burnr_core::platform::{self, LinuxVolumes};
use burnr_core::privilege::{self, DirectAccess, HelperAccess, RawAccess};
use burnr_core::progress::{CancellationToken, Phase, format_bytes};
use burnr_core::CompressionKind;
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, stdout};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

/// Resolution of the progress bar.
const BAR_STEPS: u64 = 1000;

#[derive(Parser)]
#[command(name = "burnr")]
#[command(about = "Write disk images, compressed or not, to removable drives", version)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an image to a device interactively
    Write {
        /// Image file to write (.img, .iso, .gz, .xz, .bz2, .lz, ...)
        #[arg(required = true)]
        image: PathBuf,

        /// Target device; prompts for a removable device if omitted
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Eject the device after a successful write
        #[arg(short, long)]
        eject: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Write through the page cache instead of using O_DIRECT
        #[arg(long)]
        no_direct: bool,

        /// Leave existing filesystem signatures on the device
        #[arg(long)]
        no_wipe: bool,

        /// Seconds to wait for unmount and eject
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// Always open the device through the pkexec helper, even as root
        #[arg(long)]
        helper: bool,
    },
    /// List available removable devices
    List,
    /// Eject a device
    Eject {
        /// Device to eject; prompts if omitted
        #[arg(short, long)]
        device: Option<PathBuf>,
    },
    /// Open a device and pass the descriptor back to the parent process
    #[command(name = "open-helper", hide = true)]
    OpenHelper {
        device: PathBuf,

        #[arg(long)]
        direct: bool,
    },
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// Disabling it keeps the progress line clean when the user cancels.
/// The original terminal state is restored when this struct is dropped.
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            let fd = stdout().as_raw_fd();
            if !stdout().is_terminal() {
                return Self {
                    original_termios: None,
                };
            }

            let original_termios = Termios::from_fd(fd).ok().and_then(|original| {
                let mut quiet = original;
                quiet.c_lflag &= !ECHOCTL;
                tcsetattr(fd, TCSANOW, &quiet).ok().map(|_| original)
            });
            Self { original_termios }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, original_termios).ok();
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("burnr=debug,burnr_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Presents an interactive menu for the user to select a device.
fn select_device(devices: &[DeviceDescriptor], prompt: &str) -> Result<DeviceDescriptor> {
    if devices.is_empty() {
        return Err(anyhow!("No removable devices found."));
    }

    let items: Vec<String> = devices.iter().map(|d| d.to_string()).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;

    Ok(devices[selection].clone())
}

/// Uses the explicit device if one was given, otherwise asks.
fn resolve_device(device: Option<&Path>, prompt: &str) -> Result<DeviceDescriptor> {
    match device {
        Some(path) => platform::describe(path)
            .with_context(|| format!("cannot use {} as a target", path.display())),
        None => select_device(&platform::removable_devices()?, prompt),
    }
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "Starting",
        Phase::Unmounting => "Unmounting",
        Phase::Authorizing => "Authorizing",
        Phase::Wiping => "Wiping",
        Phase::Writing => "Writing",
        Phase::Ejecting => "Ejecting",
        Phase::Completed => "Done",
        Phase::Failed => "Failed",
        Phase::Cancelled => "Cancelled",
    }
}

struct WriteArgs {
    image: PathBuf,
    device: Option<PathBuf>,
    eject: bool,
    yes: bool,
    no_direct: bool,
    no_wipe: bool,
    timeout: u64,
    helper: bool,
}

fn write(args: WriteArgs, cancel: CancellationToken) -> Result<()> {
    let image_size = std::fs::metadata(&args.image)
        .with_context(|| format!("cannot read {}", args.image.display()))?
        .len();
    let device = resolve_device(args.device.as_deref(), "Select the target device to WRITE to")?;
    let kind = CompressionKind::from_path(&args.image);

    println!(
        "{} This will erase all data on '{}' ({}).",
        style("WARNING:").red().bold(),
        device.id,
        device.formatted_size(),
    );
    println!("  Device: {}", style(device.path.display()).cyan());
    println!(
        "  Image:  {} ({}, {})",
        style(args.image.display()).cyan(),
        format_bytes(image_size),
        kind
    );
    println!();

    if !args.yes && !confirm_operation("Are you sure you want to proceed?")? {
        println!("Write operation cancelled.");
        return Ok(());
    }

    let config = FlashConfig::default()
        .direct_io(!args.no_direct)
        .eject(args.eject)
        .wipe_signatures(!args.no_wipe)
        .volume_deadline(Duration::from_secs(args.timeout));

    // SAFETY: geteuid has no preconditions.
    let is_root = unsafe { libc::geteuid() } == 0;
    let access: Arc<dyn RawAccess> = if is_root && !args.helper {
        tracing::info!(direct_io = config.direct_io, "opening device directly");
        Arc::new(DirectAccess {
            direct_io: config.direct_io,
        })
    } else {
        tracing::info!(direct_io = config.direct_io, "opening device through pkexec helper");
        Arc::new(HelperAccess::pkexec(config.direct_io)?)
    };

    let flasher = Flasher::new(Arc::new(LinuxVolumes), access, config);
    let job = flasher.spawn(args.image.clone(), device.clone(), cancel)?;

    println!();
    let pb = ProgressBar::new(BAR_STEPS);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {percent:>3}% {msg}")?
            .progress_chars("■ "),
    );
    pb.enable_steady_tick(Duration::from_millis(200));

    for update in job.updates() {
        pb.set_prefix(phase_label(update.phase));
        if update.phase == Phase::Writing {
            pb.set_position((update.fraction * BAR_STEPS as f64) as u64);
        }
        if update.phase == Phase::Completed {
            pb.set_position(BAR_STEPS);
        }
        pb.set_message(update.status.clone());
    }

    match job.join() {
        Ok(Outcome::Completed { bytes_written }) => {
            pb.finish();
            println!(
                "\n✨ Successfully flashed {} with {} ({} written).",
                style(device.path.display()).cyan(),
                style(args.image.display()).cyan(),
                format_bytes(bytes_written)
            );
            Ok(())
        }
        Ok(Outcome::Cancelled { bytes_written }) => {
            pb.abandon();
            println!(
                "\nWrite cancelled after {}. The device is left partially written.",
                format_bytes(bytes_written)
            );
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("❌ Operation failed.");
            Err(e.into())
        }
    }
}

fn list() -> Result<()> {
    let devices = platform::removable_devices()?;
    if devices.is_empty() {
        println!("No removable devices found.");
        return Ok(());
    }

    println!("Found {} removable devices:", devices.len());
    println!(
        "\n  {:<15} {:<24} {:>9} {}",
        "DEVICE", "NAME", "SIZE", "LOCATION"
    );
    println!("  {:-<15} {:-<24} {:->9} {:-<20}", "", "", "", "");
    for device in devices {
        println!("  {device}");
    }
    Ok(())
}

fn eject(device: Option<PathBuf>) -> Result<()> {
    let device = resolve_device(device.as_deref(), "Select the device to EJECT")?;
    let flasher = Flasher::new(
        Arc::new(LinuxVolumes),
        Arc::new(DirectAccess::default()),
        FlashConfig::default(),
    );
    flasher.eject(&device)?;
    println!("Ejected {}.", style(device.path.display()).cyan());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // The helper runs elevated with stdout bound to the parent's socket, so it
    // must not touch the terminal or print anything.
    if let Commands::OpenHelper { device, direct } = &cli.command {
        tracing::debug!(device = %device.display(), direct, "serving raw handle");
        privilege::serve_raw_handle(device, *direct, io::stdin().lock(), stdout().as_fd())?;
        return Ok(());
    }

    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
    })?;

    match cli.command {
        Commands::Write {
            image,
            device,
            eject,
            yes,
            no_direct,
            no_wipe,
            timeout,
            helper,
        } => write(
            WriteArgs {
                image,
                device,
                eject,
                yes,
                no_direct,
                no_wipe,
                timeout,
                helper,
            },
            cancel,
        ),
        Commands::List => list(),
        Commands::Eject { device } => eject(device),
        Commands::OpenHelper { .. } => Ok(()),
    }
}
