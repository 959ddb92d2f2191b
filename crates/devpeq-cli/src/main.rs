//! devpeq - read and write parametric EQ on USB-HID audio devices
//!
//! ## Usage
//!
//! ```text
//! devpeq list
//! devpeq slot    [--device N]
//! devpeq pull    [--device N] [--slot S] [--out FILE]
//! devpeq push    FILE [--device N] [--slot S]
//! devpeq enable  [--device N] [--slot S]
//! devpeq disable [--device N]
//! devpeq config init
//! ```
//!
//! `--config PATH` overrides the device profile file
//! (default `~/.config/devpeq/devices.yaml`); `config init` writes the
//! built-in profiles there as a starting point. Filter sets are YAML:
//!
//! ```yaml
//! global_gain: -3.0
//! filters:
//!   - { freq: 105, gain: 4.5, q: 0.7, type: LSQ }
//!   - { freq: 3000, gain: -2.0, q: 1.4 }
//! ```
//!
//! Set `RUST_LOG=trace` to see every frame on the wire.

use anyhow::{bail, Context, Result};
use devpeq_core::{
    default_config_path, enumerate_devices, load_config, save_config, CancelToken, DeviceRegistry,
    HidDeviceInfo, HidTransport, PeqConfig, PeqSnapshot, Slot, SLOT_DISABLED,
};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
enum Command {
    List,
    Slot,
    Pull { out: Option<PathBuf> },
    Push { file: PathBuf },
    Enable(bool),
    ConfigInit,
}

#[derive(Debug, Clone, PartialEq)]
struct Options {
    command: Command,
    /// Index into the `list` output
    device: usize,
    slot: Option<Slot>,
    config: Option<PathBuf>,
}

const USAGE: &str = "usage: devpeq <list|slot|pull|push FILE|enable|disable|config init> \
[--device N] [--slot S] [--out FILE] [--config PATH]";

fn parse_args(args: &[String]) -> Result<Options> {
    let mut args = args.iter();
    let command = match args.next().map(String::as_str) {
        Some("list") => Command::List,
        Some("slot") => Command::Slot,
        Some("pull") => Command::Pull { out: None },
        Some("push") => {
            let file = args.next().context("push needs a filter file")?;
            Command::Push { file: PathBuf::from(file) }
        }
        Some("enable") => Command::Enable(true),
        Some("disable") => Command::Enable(false),
        Some("config") => match args.next().map(String::as_str) {
            Some("init") => Command::ConfigInit,
            _ => bail!("usage: devpeq config init [--config PATH]"),
        },
        Some(other) => bail!("unknown command '{}'\n{}", other, USAGE),
        None => bail!("{}", USAGE),
    };

    let mut options = Options {
        command,
        device: 0,
        slot: None,
        config: None,
    };

    while let Some(flag) = args.next() {
        let mut value = || args.next().with_context(|| format!("{} needs a value", flag));
        match flag.as_str() {
            "--device" => {
                options.device = value()?.parse().with_context(|| format!("invalid {}", flag))?;
            }
            "--slot" => {
                options.slot = Some(value()?.parse().with_context(|| format!("invalid {}", flag))?);
            }
            "--config" => options.config = Some(PathBuf::from(value()?)),
            "--out" => match &mut options.command {
                Command::Pull { out } => *out = Some(PathBuf::from(value()?)),
                _ => bail!("--out only applies to pull"),
            },
            other => bail!("unknown option '{}'\n{}", other, USAGE),
        }
    }

    Ok(options)
}

fn select_device(devices: &[HidDeviceInfo], index: usize) -> Result<&HidDeviceInfo> {
    if devices.is_empty() {
        bail!("no supported PEQ device found (see `devpeq list`)");
    }
    devices
        .get(index)
        .with_context(|| format!("device {} not found, {} connected", index, devices.len()))
}

/// Write the built-in profiles to `path`, refusing to replace an existing file
fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{:?} already exists; edit it or remove it first", path);
    }
    let config = PeqConfig {
        devices: DeviceRegistry::with_builtins().profiles().to_vec(),
    };
    save_config(&config, path)?;
    println!("Wrote {} device profiles to {:?}", config.devices.len(), path);
    Ok(())
}

fn run(options: Options) -> Result<()> {
    let config_path = options.config.clone().unwrap_or_else(default_config_path);
    if options.command == Command::ConfigInit {
        return init_config(&config_path);
    }
    let registry = DeviceRegistry::from_config(&load_config(&config_path));
    let devices = enumerate_devices(&registry);

    if options.command == Command::List {
        if devices.is_empty() {
            println!("No supported PEQ devices connected");
        }
        for (i, info) in devices.iter().enumerate() {
            println!(
                "[{}] {} ({:04x}:{:04x}) {} adapter, {} bands",
                i, info.product_name, info.vendor_id, info.product_id, info.vendor, info.model.max_filters
            );
        }
        return Ok(());
    }

    let info = select_device(&devices, options.device)?;
    let adapter = info.vendor.adapter();
    let device = HidTransport::connect(info).with_context(|| format!("Failed to open '{}'", info.product_name))?;
    log::info!("Using {} adapter for '{}'", adapter.name(), info.product_name);

    match options.command {
        Command::List | Command::ConfigInit => {}
        Command::Slot => {
            println!("{}", adapter.get_current_slot(&device));
        }
        Command::Pull { out } => {
            let slot = options.slot.unwrap_or_else(|| adapter.get_current_slot(&device));

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
                log::warn!("Ctrl+C handler not installed: {}", e);
            }

            let snapshot = adapter
                .pull_from_device_cancellable(&device, slot, &cancel)
                .with_context(|| format!("Failed to read slot {}", slot))?;
            let yaml = serde_yaml::to_string(&snapshot).context("Failed to serialize filter set")?;
            match out {
                Some(path) => {
                    std::fs::write(&path, yaml).with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Saved {} bands to {:?}", snapshot.filters.len(), path);
                }
                None => print!("{}", yaml),
            }
        }
        Command::Push { file } => {
            let contents = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let snapshot: PeqSnapshot =
                serde_yaml::from_str(&contents).with_context(|| format!("Invalid filter set in {:?}", file))?;
            let slot = options.slot.unwrap_or_else(|| adapter.get_current_slot(&device));

            let disconnect = adapter
                .push_to_device(&device, slot, snapshot.global_gain, &snapshot.filters)
                .with_context(|| format!("Failed to write slot {}", slot))?;
            println!("Wrote {} bands to slot {}", snapshot.filters.len(), slot);
            if disconnect {
                println!("Reconnect the device to apply the new EQ");
            }
        }
        Command::Enable(enabled) => {
            let slot = if enabled {
                options.slot.unwrap_or_else(|| adapter.get_current_slot(&device))
            } else {
                SLOT_DISABLED
            };
            adapter
                .enable_peq(&device, enabled, slot)
                .with_context(|| format!("Failed to {} PEQ", if enabled { "enable" } else { "disable" }))?;
            println!("PEQ {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_args(&args)?;
    log::debug!("{:?}", options);
    run(options)
}
