//! Bootloader-adjacent state: the metadata store and the grub config reader.

pub mod grub;
pub mod meta;

pub use grub::{BootEntry, GrubConfig};
pub use meta::{MetaStore, MetaTag, SqliteMetaStore};
