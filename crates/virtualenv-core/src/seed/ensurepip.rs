use anyhow::{Context, Result};

use crate::create::Creator;
use crate::process::run_command;

pub(super) fn seed(creator: &Creator) -> Result<()> {
    let exe = creator.exe();
    let args: Vec<String> = ["-m", "ensurepip", "--default-pip"]
        .iter()
        .map(ToString::to_string)
        .collect();
    tracing::debug!(exe = %exe.display(), "ensurepip");
    run_command(exe, &args, &[])?
        .ensure_success(exe, &args)
        .context("failed seed with ensurepip")?;
    Ok(())
}
