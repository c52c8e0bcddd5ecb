use std::fmt::{Display, Formatter};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use nix::libc;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::Error;
use crate::pyproject::BuildSystem;

/// The bootstrap program executed with `python -c` in the hook subprocess.
static BOOTSTRAP_SOURCE: &str = include_str!("bootstrap.py");

/// The descriptor number the child writes its result to. Fixed, so the
/// bootstrap command line is independent of which descriptors happen to be
/// free in the parent.
const RESULT_FD: i32 = 3;

/// The PEP 517 hooks the bootstrap program knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    BuildWheel,
    BuildSdist,
    GetRequiresForBuildWheel,
    GetRequiresForBuildSdist,
    PrepareMetadataForBuildWheel,
}

impl Hook {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuildWheel => "build_wheel",
            Self::BuildSdist => "build_sdist",
            Self::GetRequiresForBuildWheel => "get_requires_for_build_wheel",
            Self::GetRequiresForBuildSdist => "get_requires_for_build_sdist",
            Self::PrepareMetadataForBuildWheel => "prepare_metadata_for_build_wheel",
        }
    }
}

impl Display for Hook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct HookResult {
    result: serde_json::Value,
}

fn hook_command(
    python: &Path,
    project_root: &Path,
    build_system: &BuildSystem,
    hook: Hook,
    hook_args: &str,
    verbose: bool,
) -> Command {
    let mut command = Command::new(python);
    command
        .arg("-c")
        .arg(BOOTSTRAP_SOURCE)
        .arg("--result-fd")
        .arg(RESULT_FD.to_string());
    if verbose {
        command.arg("-v");
    }
    command.arg(&build_system.build_backend);
    for entry in build_system.backend_path.iter().flatten() {
        command.arg("--backend-path").arg(entry);
    }
    command
        .arg(hook.as_str())
        .arg("--hook-args")
        .arg(hook_args)
        .current_dir(project_root);
    command
}

/// Call a single backend hook in a subprocess of `python`.
///
/// `hook_args` is the `[args, kwargs]` pair handed to the hook verbatim. In
/// verbose mode the child's stdout/stderr stream through; otherwise they are
/// captured and reported on failure. The result arrives as JSON over a
/// dedicated pipe, so backend output cannot corrupt it.
#[instrument(skip_all, fields(hook = %hook))]
pub fn call_hook(
    python: &Path,
    project_root: &Path,
    build_system: &BuildSystem,
    hook: Hook,
    hook_args: &serde_json::Value,
    verbose: bool,
) -> Result<serde_json::Value, Error> {
    let (reader, writer) = std::io::pipe()?;

    let mut command = hook_command(
        python,
        project_root,
        build_system,
        hook,
        &serde_json::to_string(hook_args)?,
        verbose,
    );
    if verbose {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    } else {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    // Map the write end onto the fixed descriptor number and clear
    // close-on-exec so the child inherits it.
    let writer_fd = writer.as_raw_fd();
    unsafe {
        command.pre_exec(move || {
            if writer_fd == RESULT_FD {
                let flags = libc::fcntl(RESULT_FD, libc::F_GETFD);
                if flags < 0
                    || libc::fcntl(RESULT_FD, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                {
                    return Err(std::io::Error::last_os_error());
                }
            } else if libc::dup2(writer_fd, RESULT_FD) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    debug!("Calling hook {hook} in subprocess");
    let child = command
        .spawn()
        .map_err(|err| Error::CommandFailed(python.to_path_buf(), err))?;

    // Drain the pipe while the child runs; a result larger than the pipe
    // buffer would otherwise block the child against our `wait`.
    let reader_thread = thread::spawn(move || {
        let mut reader = reader;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map(|_| bytes)
    });

    let output = child
        .wait_with_output()
        .map_err(|err| Error::CommandFailed(python.to_path_buf(), err))?;

    // Close the parent's copy of the write end so the reader sees EOF.
    drop(writer);
    let result_bytes = reader_thread
        .join()
        .map_err(|_| Error::ResultChannelPanic)?
        .map_err(Error::ResultChannel)?;

    if !output.status.success() {
        return Err(Error::HookFailed {
            message: format!("Failed to call hook {hook} ({})", output.status),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let HookResult { result } =
        serde_json::from_slice(&result_bytes).map_err(|source| Error::InvalidHookResult {
            raw: String::from_utf8_lossy(&result_bytes).into_owned(),
            source,
        })?;
    Ok(result)
}
