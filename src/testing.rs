use std::path::PathBuf;

use tempfile::TempDir;

use crate::consts::{BLOCK_SIZE, SECTOR_SIZE};
use crate::driver::file_drive::FileDrive;
use crate::ops::TinyFs;
use crate::structure::{FormatOptions, Structure};

pub(crate) const SCRATCH_BLOCKS: u64 = 256;

pub(crate) fn image_path(dir: &TempDir) -> PathBuf {
    dir.path().join("tinyfs.img")
}

pub(crate) fn scratch_drive(dir: &TempDir) -> FileDrive {
    FileDrive::init(image_path(dir), SCRATCH_BLOCKS * BLOCK_SIZE as u64, SECTOR_SIZE).unwrap()
}

pub(crate) fn scratch_options(max_inodes: u32) -> FormatOptions {
    FormatOptions { max_inodes, ..FormatOptions::default() }
}

pub(crate) fn scratch_structure(max_inodes: u32) -> (TempDir, Structure<FileDrive>) {
    let dir = tempfile::tempdir().unwrap();
    let structure = Structure::format(scratch_drive(&dir), &scratch_options(max_inodes)).unwrap();
    (dir, structure)
}

pub(crate) fn scratch_fs(max_inodes: u32) -> (TempDir, TinyFs<FileDrive>) {
    let dir = tempfile::tempdir().unwrap();
    let fs = TinyFs::format(scratch_drive(&dir), &scratch_options(max_inodes)).unwrap();
    (dir, fs)
}
