#[macro_use]
extern crate log;

use std::path::PathBuf;

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use simplelog::{Config, LevelFilter, SimpleLogger};
use structopt::StructOpt;

use frame_bootloader::host::Options;
use frame_bootloader::linux::LinuxProgrammer;

#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "frame-boot", about = "Firmware upgrade over the frame bootloader")]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    command: Operation,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Read device information
    Info,

    /// Check the bootloader responds
    Ping,

    /// Write a raw firmware image
    Upload {
        /// Binary image to write at the application address
        #[structopt(parse(from_os_str))]
        file: PathBuf,

        /// Start the application once written
        #[structopt(long)]
        run: bool,
    },

    /// Request image verification
    Verify,

    /// Start the application
    Run,
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = execute(o) {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn execute(o: Args) -> anyhow::Result<()> {
    let Args {
        port,
        baud,
        options,
        command,
        ..
    } = o;

    info!("Connecting to serial port {}", port);

    let mut p = LinuxProgrammer::linux(&port, baud, options)
        .with_context(|| format!("opening serial port {}", port))?;

    match command {
        Operation::Info => {
            let info = p.enter_boot()?;
            info!("Device: {}", info);
            info!(
                "Flash: {} at 0x{:08x}, packet size {}",
                bytefmt::format(info.flash_size as u64),
                info.app_address,
                info.packet_size
            );
        }
        Operation::Ping => {
            p.ping()?;
            info!("Bootloader responded");
        }
        Operation::Upload { file, run } => {
            let image = std::fs::read(&file)
                .with_context(|| format!("reading image {}", file.display()))?;

            let packet_size = {
                let info = p.enter_boot()?;
                info!("Device: {}", info);

                if image.len() as u64 > info.flash_size as u64 {
                    bail!(
                        "image of {} exceeds device flash of {}",
                        bytefmt::format(image.len() as u64),
                        bytefmt::format(info.flash_size as u64)
                    );
                }
                info.packet_size
            };

            let head = &image[..image.len().min(16)];
            debug!("Image head: {}", hex::encode(head));

            info!(
                "Uploading {} from {}",
                bytefmt::format(image.len() as u64),
                file.display()
            );

            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{bar:40} {pos}/{len} packets ({eta})")
                    .progress_chars("=> "),
            );

            let r = p.upload(&image, packet_size, |done, total| {
                bar.set_length(total as u64);
                bar.set_position(done as u64);
            });
            bar.finish_and_clear();
            r?;

            info!("Upload complete");

            if run {
                p.run_app()?;
                info!("Application started");
            }
        }
        Operation::Verify => {
            p.verify()?;
            info!("Verify acknowledged");
        }
        Operation::Run => {
            p.run_app()?;
            info!("Application started");
        }
    }

    Ok(())
}
