#![forbid(unsafe_code)]

//! Process and filesystem guards shared by the server and the download workers.

use std::path::{Component, Path};

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start when running as root.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; start it as a regular user or service account");
    }
    Ok(())
}

/// True when `name` is a single plain path segment (no separators, `..`, or
/// root), so joining it onto the download directory cannot escape it.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
