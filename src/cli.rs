use std::path::PathBuf;

use clap::Parser;

use crate::consts::DEFAULT_INODE_COUNT;
use crate::structure::FormatOptions;

#[derive(Parser, Debug)]
#[command(version, about = "Mount a single-file inode filesystem image")]
pub struct Cli {
    /// Disk image backing the filesystem, created if missing
    pub image: PathBuf,

    /// Directory to mount the filesystem on
    pub mountpoint: PathBuf,

    /// Format the image even if it already exists
    #[arg(long)]
    pub format: bool,

    /// Inode capacity used when formatting
    #[arg(long, default_value_t = DEFAULT_INODE_COUNT)]
    pub inodes: u32,

    /// Allow other users to access the mount
    #[arg(long)]
    pub allow_other: bool,

    /// Unmount automatically when the process exits
    #[arg(long)]
    pub auto_unmount: bool,
}

impl Cli {
    /// The root directory is owned by whoever formats the image.
    pub fn format_options(&self) -> FormatOptions {
        // SAFETY: getuid and getgid cannot fail and touch no memory.
        let (user_id, group_id) = unsafe { (libc::getuid(), libc::getgid()) };
        FormatOptions { max_inodes: self.inodes, user_id, group_id }
    }
}
