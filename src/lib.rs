pub mod cli;
pub mod consts;
pub mod driver;
pub mod fuse;
pub mod io;
pub mod ops;
pub mod structure;
pub mod util;

#[cfg(test)]
mod testing;
