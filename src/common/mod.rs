//! Shared utilities across winmedia modules.

pub mod files;
pub mod mounts;
pub mod temp;

pub use files::{copy_dir_recursive, write_file_mode, write_file_with_dirs};
pub use temp::{cleanup_work_dir, prepare_work_dir};
