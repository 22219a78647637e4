//! Async filesystem helpers re-exported from the underlying runtime.

pub use tokio::fs::{
    create_dir_all, metadata, read, read_dir, remove_file, rename, write, File, OpenOptions,
};
