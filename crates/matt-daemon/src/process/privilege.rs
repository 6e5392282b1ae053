use nix::unistd::Uid;
use tracing::info;

use super::PROCESS_TARGET;
use super::errors::LaunchError;

/// Fails fast unless `euid` is root.
pub(super) fn ensure_root(euid: Uid) -> Result<(), LaunchError> {
    if euid.is_root() {
        return Ok(());
    }
    info!(
        target: PROCESS_TARGET,
        euid = euid.as_raw(),
        "refusing to start without root privileges"
    );
    Err(LaunchError::InsufficientPrivilege {
        euid: euid.as_raw(),
    })
}
