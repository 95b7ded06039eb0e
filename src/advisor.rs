//! Environment report and optional source install for flash-attn.
//!
//! The report always prints; `--install` additionally runs the installer with
//! the terminal attached and maps its exit status to ours (0 or 1).

use std::io::Write;
use std::process::{Command, Output, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::Regex;
use tch::Device;
use tracing::{debug, info, warn};

use crate::device::{describe, get_device};

pub const WHEEL_FINDER_URL: &str = "https://flashattn.dev";

pub const INSTALL_COMMAND: [&str; 5] = ["uv", "pip", "install", "flash-attn", "--no-build-isolation"];

const TORCH_QUERY: &str =
    "import torch; print(torch.__version__); print(getattr(torch.version, 'cuda', None) or '')";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorchInfo {
    pub version: String,
    /// CUDA version PyTorch was built against, `None` for CPU builds.
    pub cuda: Option<String>,
}

/// Read-only queries about the Python environment flash-attn installs into.
pub trait EnvironmentProbe {
    /// `major.minor` of the interpreter.
    fn python_version(&self) -> Result<String>;
    fn torch(&self) -> Result<TorchInfo>;
    /// Release of the CUDA toolkit compiler, needed for source builds.
    /// Not part of the wheel selection, reported alongside it.
    fn nvcc_release(&self) -> Result<String>;
    /// Device `tch` picks on this host, reported alongside the wheel selection.
    fn device(&self) -> Device;
}

pub trait Installer {
    /// Runs `command` to completion and returns its exit code (`None` if killed by a signal).
    fn install(&self, command: &[&str]) -> Result<Option<i32>>;
}

static PYTHON_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Python (\d+)\.(\d+)").expect("valid python version pattern"));
static NVCC_RELEASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"release (\d+\.\d+)").expect("valid nvcc release pattern"));

pub fn parse_python_version(text: &str) -> Option<String> {
    let caps = PYTHON_VERSION_RE.captures(text)?;
    Some(format!("{}.{}", &caps[1], &caps[2]))
}

pub fn parse_nvcc_release(text: &str) -> Option<String> {
    NVCC_RELEASE_RE
        .captures(text)
        .map(|caps| caps[1].to_string())
}

fn parse_torch_query(text: &str) -> Option<TorchInfo> {
    let mut lines = text.lines().map(str::trim);
    let version = lines.next().filter(|v| !v.is_empty())?.to_string();
    let cuda = lines
        .next()
        .filter(|c| !c.is_empty() && *c != "None")
        .map(str::to_string);
    Some(TorchInfo { version, cuda })
}

fn run_captured(command: &[&str]) -> Result<Output> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to run {}", command.join(" ")))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            command.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

/// Stdout and stderr of a successful run, concatenated.
fn capture(command: &[&str]) -> Result<String> {
    let output = run_captured(command)?;
    // some interpreters print their version on stderr
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

fn capture_stdout(command: &[&str]) -> Result<String> {
    let output = run_captured(command)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Interpreter launchers in lookup order. `uv run python` comes first because
/// it resolves the same environment `uv pip install` targets.
pub const PYTHON_LAUNCHERS: [&[&str]; 3] = [&["uv", "run", "python"], &["python3"], &["python"]];

#[derive(Debug, Clone)]
struct Interpreter {
    launcher: &'static [&'static str],
    version: String,
}

/// Probes the Python environment the installer targets and the local CUDA toolkit.
///
/// The first launcher in [`PYTHON_LAUNCHERS`] that reports a version is used
/// for every later Python query.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe {
    interpreter: OnceCell<Option<Interpreter>>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn interpreter(&self) -> Option<&Interpreter> {
        self.interpreter
            .get_or_init(|| {
                PYTHON_LAUNCHERS.iter().find_map(|launcher| {
                    let command = [*launcher, &["--version"][..]].concat();
                    let text = match capture(&command) {
                        Ok(text) => text,
                        Err(err) => {
                            debug!("python launcher unavailable: {err:#}");
                            return None;
                        }
                    };
                    let version = parse_python_version(&text)?;
                    debug!(launcher = %launcher.join(" "), %version, "resolved python");
                    Some(Interpreter {
                        launcher: *launcher,
                        version,
                    })
                })
            })
            .as_ref()
    }
}

impl EnvironmentProbe for SystemProbe {
    fn python_version(&self) -> Result<String> {
        self.interpreter()
            .map(|python| python.version.clone())
            .ok_or_else(|| anyhow!("no python interpreter found via {PYTHON_LAUNCHERS:?}"))
    }

    fn torch(&self) -> Result<TorchInfo> {
        let python = self
            .interpreter()
            .ok_or_else(|| anyhow!("no python interpreter found"))?;
        let command = [python.launcher, &["-c", TORCH_QUERY][..]].concat();
        let text = capture_stdout(&command)?;
        parse_torch_query(&text).ok_or_else(|| anyhow!("torch reported no version"))
    }

    /// Supplementary: source builds compile against this toolkit.
    fn nvcc_release(&self) -> Result<String> {
        let text = capture(&["nvcc", "--version"])?;
        parse_nvcc_release(&text).ok_or_else(|| anyhow!("no release in nvcc output"))
    }

    /// Supplementary: the libtorch device this crate's rope tensors would land on.
    fn device(&self) -> Device {
        get_device()
    }
}

/// Spawns the installer with inherited stdio and waits for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandInstaller;

impl Installer for CommandInstaller {
    fn install(&self, command: &[&str]) -> Result<Option<i32>> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("empty install command"))?;
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("failed to start {program}"))?;
        Ok(status.code())
    }
}

fn write_report<W: Write>(probe: &dyn EnvironmentProbe, out: &mut W) -> Result<()> {
    match probe.python_version() {
        Ok(python) => writeln!(out, "Python:  {python}")?,
        Err(err) => {
            debug!("python probe failed: {err:#}");
            writeln!(out, "Python:  unknown")?;
        }
    }

    match probe.torch() {
        Ok(torch) => {
            writeln!(out, "PyTorch: {}", torch.version)?;
            writeln!(out, "CUDA:    {}", torch.cuda.as_deref().unwrap_or("N/A"))?;
        }
        Err(err) => {
            debug!("torch probe failed: {err:#}");
            writeln!(out, "PyTorch: not installed")?;
            writeln!(out, "CUDA:    N/A (install PyTorch first, then run this again)")?;
        }
    }

    match probe.nvcc_release() {
        Ok(release) => writeln!(out, "nvcc:    {release}")?,
        Err(err) => {
            debug!("nvcc probe failed: {err:#}");
            writeln!(out, "nvcc:    not found")?;
        }
    }
    writeln!(out, "Device:  {}", describe(probe.device()))?;

    writeln!(out)?;
    writeln!(out, "Prebuilt wheels (recommended):")?;
    writeln!(out, "  1. Open {WHEEL_FINDER_URL}")?;
    writeln!(out, "  2. Select Platform, Python, PyTorch (match above), and CUDA")?;
    writeln!(out, "  3. Copy the 'uv pip install <url>' or 'pip install <url>' command")?;
    writeln!(out, "  4. Run it in this environment")?;
    writeln!(out)?;
    Ok(())
}

/// Prints the report and, when `install` is set, runs the installer.
///
/// Returns the process exit code.
pub fn run<W: Write>(
    install: bool,
    probe: &dyn EnvironmentProbe,
    installer: &dyn Installer,
    out: &mut W,
) -> Result<i32> {
    write_report(probe, out)?;

    if !install {
        writeln!(out, "To attempt install from source (requires matching CUDA toolkit):")?;
        writeln!(out, "  cargo run --bin install_flash_attn -- --install")?;
        return Ok(0);
    }

    let command = INSTALL_COMMAND.join(" ");
    writeln!(out, "Attempting: {command}")?;
    writeln!(out)?;
    // the installer writes straight to the terminal
    out.flush()?;

    info!(%command, "running installer");
    let code = installer.install(&INSTALL_COMMAND)?;
    if code != Some(0) {
        warn!(?code, "installer failed");
        writeln!(out)?;
        writeln!(out, "Install failed. Use a prebuilt wheel instead:")?;
        writeln!(out, "  {WHEEL_FINDER_URL}")?;
        writeln!(
            out,
            "Or ensure system CUDA matches PyTorch's CUDA and try again with MAX_JOBS=4 if low on RAM."
        )?;
        return Ok(1);
    }

    writeln!(out, "flash-attn installed successfully.")?;
    Ok(0)
}
