use anyhow::Context;
use clap::Parser;
use fuser::MountOption;
use log::info;

use tinyfs::cli::Cli;
use tinyfs::consts::{DISK_SIZE, SECTOR_SIZE};
use tinyfs::driver::file_drive::FileDrive;
use tinyfs::driver::DeviceDriver;
use tinyfs::fuse::FuseDriver;
use tinyfs::ops::TinyFs;
use tinyfs::util::format::pretty_size_from_bytes;

fn open_image(cli: &Cli) -> anyhow::Result<TinyFs<FileDrive>> {
    if cli.format || !cli.image.exists() {
        info!("Formatting {:?} ({})", cli.image, pretty_size_from_bytes(DISK_SIZE));
        let drive = FileDrive::init(&cli.image, DISK_SIZE, SECTOR_SIZE)
            .with_context(|| format!("creating image {:?}", cli.image))?;
        return TinyFs::format(drive, &cli.format_options()).context("formatting image");
    }

    let drive = FileDrive::open(&cli.image, SECTOR_SIZE).with_context(|| format!("opening image {:?}", cli.image))?;
    info!("Opened {:?} ({})", cli.image, pretty_size_from_bytes(drive.get_size()));
    TinyFs::mount(drive).context("mounting image")
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let fs = open_image(&cli)?;
    let stats = fs.statfs()?;
    info!(
        "{} of {} blocks free, {} of {} inodes free",
        stats.free_blocks, stats.total_blocks, stats.free_inodes, stats.total_inodes
    );

    let mut options = vec![MountOption::FSName("tinyfs".to_string()), MountOption::DefaultPermissions];
    if cli.allow_other {
        options.push(MountOption::AllowOther);
    }
    if cli.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }

    info!("Mounting on {:?}", cli.mountpoint);
    fuser::mount2(FuseDriver::new(fs), &cli.mountpoint, &options)
        .with_context(|| format!("mounting on {:?}", cli.mountpoint))
}
