use std::os::raw::c_int;

use thiserror::Error;

type ErrorNum = c_int;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("no free inode or data block left")]
    Exhausted,
    #[error("directory has no room for another entry")]
    NoSpace,
    #[error("range exceeds the direct block limit")]
    FileTooBig,
    #[error("file name too long")]
    NameTooLong,
    #[error("invalid file name")]
    InvalidName,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("block {0} is out of range")]
    BlockOutOfRange(u64),
    #[error("filesystem lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn errno(&self) -> ErrorNum {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::AlreadyExists => libc::EEXIST,
            Error::NotADirectory => libc::ENOTDIR,
            Error::IsADirectory => libc::EISDIR,
            Error::DirectoryNotEmpty => libc::ENOTEMPTY,
            Error::Exhausted | Error::NoSpace => libc::ENOSPC,
            Error::FileTooBig => libc::EFBIG,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::InvalidName => libc::EINVAL,
            Error::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Error::InvalidImage(_) | Error::BlockOutOfRange(_) | Error::Poisoned => libc::EIO,
        }
    }
}
