//! Busybox applet symlinks for emulated images.
//!
//! Images built with `--no-scripts` never ran busybox's post-install
//! trigger, so `/bin/sh` and friends don't exist yet. Running
//! `busybox --install -s` inside the image creates them.

use anyhow::Result;

use crate::build::BuildContext;

/// Busybox location inside the image.
pub const BUSYBOX: &str = "/bin/busybox";

/// Create busybox applet symlinks by running busybox inside the image.
///
/// An image without busybox has nothing to install; that is not an error.
pub fn install_busybox_symlinks(ctx: &BuildContext) -> Result<()> {
    let busybox = ctx.work_dir().join(BUSYBOX.trim_start_matches('/'));
    if busybox.symlink_metadata().is_err() {
        tracing::debug!("{} not present, skipping applet symlinks", BUSYBOX);
        return Ok(());
    }

    ctx.execute_in_root(&[BUSYBOX, "--install", "-s"])?;
    tracing::info!("installed busybox applet symlinks");
    Ok(())
}
