//! Test runner for dynexe
//!
//! This test runner validates the launcher against a real dynamic linker by:
//! 1. Copying the host's interpreter (and libc, when it sits next to it) into
//!    a fresh `shared/lib`
//! 2. Installing demo binaries into `shared/bin`
//! 3. Installing the launcher as `bin/dynexe`, as a renamed symlink, or flat
//!    in the root
//! 4. Running it and checking what the demo targets report back
//!
//! Usage: test-runner --launcher <path> --test-binaries <dir>

use std::env;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use dynexe::interpreter::find_interpreter;

/// Where hosts usually keep their dynamic linker, most specific first.
const HOST_LIB_DIRS: &[&str] = &[
    "/lib64",
    "/usr/lib64",
    "/lib",
    "/usr/lib",
    "/lib/x86_64-linux-gnu",
    "/lib/aarch64-linux-gnu",
];

const MARKER_VAR: &str = "DYNEXE_TEST_MARKER";

#[derive(Parser, Debug)]
#[command(name = "test-runner", about = "End-to-end tests for the dynexe launcher")]
struct Args {
    /// Path to the dynexe binary
    #[arg(long)]
    launcher: PathBuf,

    /// Directory containing the demo binaries (print-args, exit-with)
    #[arg(long)]
    test_binaries: PathBuf,

    /// Working directory for test artifacts (default: temp dir)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Dynamic linker to bundle (default: first one found on the host)
    #[arg(long)]
    host_linker: Option<PathBuf>,
}

/// Test configuration
struct TestConfig {
    launcher_path: PathBuf,
    test_binaries_dir: PathBuf,
    work_dir: PathBuf,
    /// Host interpreter copied into every runtime tree
    linker_path: PathBuf,
    /// Host libc from the linker's own directory, if there is one
    libc_path: Option<PathBuf>,
}

impl TestConfig {
    fn from_args(args: Args) -> Result<Self> {
        ensure!(args.launcher.exists(), "Launcher not found: {}", args.launcher.display());
        ensure!(
            args.test_binaries.exists(),
            "Test binaries dir not found: {}",
            args.test_binaries.display()
        );

        let linker_path = match args.host_linker {
            Some(path) => path,
            None => find_host_linker()?,
        };
        let canonical_linker = fs::canonicalize(&linker_path)
            .with_context(|| format!("Failed to resolve linker {}", linker_path.display()))?;
        let libc_path = canonical_linker
            .parent()
            .map(|dir| dir.join("libc.so.6"))
            .filter(|path| path.is_file());

        Ok(Self {
            launcher_path: args.launcher,
            test_binaries_dir: args.test_binaries,
            work_dir: args
                .work_dir
                .unwrap_or_else(|| env::temp_dir().join("dynexe-tests")),
            linker_path,
            libc_path,
        })
    }

    fn demo(&self, name: &str) -> PathBuf {
        self.test_binaries_dir.join(name)
    }
}

fn find_host_linker() -> Result<PathBuf> {
    for dir in HOST_LIB_DIRS {
        if let Ok(name) = find_interpreter(Path::new(dir)) {
            return Ok(Path::new(dir).join(name));
        }
    }
    bail!("No dynamic linker found in {}; pass --host-linker", HOST_LIB_DIRS.join(", "))
}

/// One `<root>/{bin,shared/bin,shared/lib}` tree
struct RuntimeTree {
    root: PathBuf,
}

impl RuntimeTree {
    /// Create an empty tree under `base_dir/name`
    fn new(base_dir: &Path, name: &str) -> Result<Self> {
        let root = base_dir.join(name);
        for sub in ["bin", "shared/bin", "shared/lib"] {
            fs::create_dir_all(root.join(sub))
                .with_context(|| format!("Failed to create {}/{}", root.display(), sub))?;
        }
        // Diagnostics from the launcher use the canonical root.
        let root = fs::canonicalize(&root)
            .with_context(|| format!("Failed to resolve {}", root.display()))?;
        Ok(Self { root })
    }

    fn bin_dir(&self) -> PathBuf {
        self.root.join("shared/bin")
    }

    fn lib_dir(&self) -> PathBuf {
        self.root.join("shared/lib")
    }

    /// Install the launcher at `root/<relative>`
    fn install_launcher(&self, config: &TestConfig, relative: &str) -> Result<PathBuf> {
        let dest = self.root.join(relative);
        copy_executable(&config.launcher_path, &dest)?;
        Ok(dest)
    }

    /// Bundle the host linker, plus libc when available
    fn bundle_runtime(&self, config: &TestConfig) -> Result<()> {
        self.add_library(&config.linker_path)?;
        if let Some(libc) = &config.libc_path {
            self.add_library(libc)?;
        }
        Ok(())
    }

    fn add_library(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .with_context(|| format!("No file name in {}", source.display()))?;
        let dest = self.lib_dir().join(name);
        copy_executable(source, &dest)?;
        Ok(dest)
    }

    fn add_target(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .with_context(|| format!("No file name in {}", source.display()))?;
        let dest = self.bin_dir().join(name);
        copy_executable(source, &dest)?;
        Ok(dest)
    }
}

/// Copy a file (following symlinks) and make it executable
fn copy_executable(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;
    let mut perms = fs::metadata(dest)
        .with_context(|| format!("Failed to get metadata for {}", dest.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(dest, perms)
        .with_context(|| format!("Failed to set permissions on {}", dest.display()))?;
    Ok(())
}

struct RunOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
    pid: u32,
}

impl RunOutput {
    /// Value of the first `<key>:` line
    fn field(&self, key: &str) -> Option<&str> {
        let prefix = format!("{}:", key);
        self.stdout
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
    }

    fn mapped(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .filter_map(|line| line.strip_prefix("MAPPED:"))
    }

    fn expect_success(&self) -> Result<()> {
        ensure!(
            self.exit_code == 0,
            "Launcher failed with exit code {}: {}",
            self.exit_code,
            self.stderr
        );
        Ok(())
    }
}

/// Run a launcher and capture its output
fn run_launcher(program: &Path, args: &[&str], envs: &[(&str, &str)]) -> Result<RunOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_remove(MARKER_VAR)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to run {}", program.display()))?;
    let pid = child.id();
    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed to wait for {}", program.display()))?;

    Ok(RunOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        pid,
    })
}

/// Standard tree: bundled runtime, print-args target, launcher in bin/
fn print_args_tree(config: &TestConfig, name: &str) -> Result<(RuntimeTree, PathBuf)> {
    let tree = RuntimeTree::new(&config.work_dir, name)?;
    tree.bundle_runtime(config)?;
    tree.add_target(&config.demo("print-args"))?;
    let launcher = tree.install_launcher(config, "bin/dynexe")?;
    Ok((tree, launcher))
}

/// Test: `dynexe <target> args...`
fn test_dispatch_by_argument(config: &TestConfig) -> Result<()> {
    println!("  Running test: dispatch_by_argument");

    let (tree, launcher) = print_args_tree(config, "test_dispatch_by_argument")?;
    let output = run_launcher(&launcher, &["print-args", "--flag", "val"], &[])?;
    output.expect_success()?;

    let expected = format!("{}/print-args|--flag|val", tree.bin_dir().display());
    ensure!(
        output.field("ARGS") == Some(expected.as_str()),
        "Unexpected ARGS, wanted {}: {}",
        expected,
        output.stdout
    );
    ensure!(output.field("ARGC") == Some("3"), "Expected ARGC:3 but got: {}", output.stdout);

    println!("    PASS");
    Ok(())
}

/// Test: launcher symlinked under the target's name
fn test_dispatch_by_identity(config: &TestConfig) -> Result<()> {
    println!("  Running test: dispatch_by_identity");

    let (tree, _launcher) = print_args_tree(config, "test_dispatch_by_identity")?;
    let renamed = tree.root.join("bin/print-args");
    symlink("dynexe", &renamed).context("Failed to symlink print-args")?;

    let output = run_launcher(&renamed, &["dynexe", "x"], &[])?;
    output.expect_success()?;

    let expected = format!("{}/print-args|dynexe|x", tree.bin_dir().display());
    ensure!(
        output.field("ARGS") == Some(expected.as_str()),
        "Unexpected ARGS, wanted {}: {}",
        expected,
        output.stdout
    );

    println!("    PASS");
    Ok(())
}

/// Test: launcher directly in the root, no bin/
fn test_flat_layout(config: &TestConfig) -> Result<()> {
    println!("  Running test: flat_layout");

    let tree = RuntimeTree::new(&config.work_dir, "test_flat_layout")?;
    tree.bundle_runtime(config)?;
    tree.add_target(&config.demo("print-args"))?;
    let launcher = tree.install_launcher(config, "dynexe")?;

    let output = run_launcher(&launcher, &["print-args"], &[])?;
    output.expect_success()?;

    let expected = format!("{}/print-args", tree.bin_dir().display());
    ensure!(
        output.field("ARGS") == Some(expected.as_str()),
        "Unexpected ARGS, wanted {}: {}",
        expected,
        output.stdout
    );

    println!("    PASS");
    Ok(())
}

/// Test: the bundled interpreter (and libc) are the ones mapped
fn test_bundled_runtime_is_loaded(config: &TestConfig) -> Result<()> {
    println!("  Running test: bundled_runtime_is_loaded");

    let (tree, launcher) = print_args_tree(config, "test_bundled_runtime")?;
    let output = run_launcher(&launcher, &["print-args"], &[])?;
    output.expect_success()?;

    let lib_dir = tree.lib_dir();
    let from_lib_dir: Vec<&str> = output
        .mapped()
        .filter(|path| Path::new(path).starts_with(&lib_dir))
        .collect();

    let linker_name = find_interpreter(&lib_dir)?;
    let linker = lib_dir.join(&linker_name);
    ensure!(
        from_lib_dir.iter().any(|path| Path::new(path) == linker),
        "Interpreter {} not mapped: {}",
        linker.display(),
        output.stdout
    );
    println!("    PASS (interpreter)");

    if config.libc_path.is_some() {
        let libc = lib_dir.join("libc.so.6");
        ensure!(
            from_lib_dir.iter().any(|path| Path::new(path) == libc),
            "Bundled libc {} not mapped: {}",
            libc.display(),
            output.stdout
        );
        println!("    PASS (libc from --library-path)");
    }

    Ok(())
}

/// Test: the target replaces the launcher in the same process
fn test_process_replaced(config: &TestConfig) -> Result<()> {
    println!("  Running test: process_replaced");

    let (_tree, launcher) = print_args_tree(config, "test_process_replaced")?;
    let output = run_launcher(&launcher, &["print-args"], &[])?;
    output.expect_success()?;

    let expected = output.pid.to_string();
    ensure!(
        output.field("PID") == Some(expected.as_str()),
        "Expected PID:{} but got: {}",
        expected,
        output.stdout
    );

    println!("    PASS");
    Ok(())
}

/// Test: environment reaches the target untouched
fn test_environment_passthrough(config: &TestConfig) -> Result<()> {
    println!("  Running test: environment_passthrough");

    let (_tree, launcher) = print_args_tree(config, "test_environment")?;

    let output = run_launcher(&launcher, &["print-args"], &[(MARKER_VAR, "a=b c")])?;
    output.expect_success()?;
    ensure!(
        output.field("ENV") == Some("DYNEXE_TEST_MARKER=a=b c"),
        "Marker not propagated: {}",
        output.stdout
    );
    println!("    PASS (set)");

    let output = run_launcher(&launcher, &["print-args"], &[])?;
    output.expect_success()?;
    ensure!(
        output.field("ENV") == Some("DYNEXE_TEST_MARKER=<unset>"),
        "Marker appeared from nowhere: {}",
        output.stdout
    );
    println!("    PASS (unset)");

    Ok(())
}

/// Test: exit status of the target is the launcher's
fn test_exit_status(config: &TestConfig) -> Result<()> {
    println!("  Running test: exit_status");

    let tree = RuntimeTree::new(&config.work_dir, "test_exit_status")?;
    tree.bundle_runtime(config)?;
    tree.add_target(&config.demo("exit-with"))?;
    let launcher = tree.install_launcher(config, "bin/dynexe")?;

    for code in ["0", "3", "42"] {
        let output = run_launcher(&launcher, &["exit-with", code], &[])?;
        ensure!(
            output.exit_code.to_string() == code,
            "Expected exit code {} but got {}: {}",
            code,
            output.exit_code,
            output.stderr
        );
    }

    println!("    PASS");
    Ok(())
}

/// Test: no interpreter in shared/lib
fn test_empty_lib_dir(config: &TestConfig) -> Result<()> {
    println!("  Running test: empty_lib_dir");

    let tree = RuntimeTree::new(&config.work_dir, "test_empty_lib_dir")?;
    tree.add_target(&config.demo("print-args"))?;
    let launcher = tree.install_launcher(config, "bin/dynexe")?;

    let output = run_launcher(&launcher, &["print-args"], &[])?;
    ensure!(output.exit_code == 1, "Expected exit code 1 but got {}", output.exit_code);
    ensure!(output.stdout.is_empty(), "Unexpected stdout: {}", output.stdout);

    let lib_dir = tree.lib_dir().display().to_string();
    ensure!(
        output.stderr.contains(&lib_dir),
        "Diagnostic does not name {}: {}",
        lib_dir,
        output.stderr
    );

    println!("    PASS");
    Ok(())
}

/// Test: shared/lib missing entirely
fn test_missing_lib_dir(config: &TestConfig) -> Result<()> {
    println!("  Running test: missing_lib_dir");

    let tree = RuntimeTree::new(&config.work_dir, "test_missing_lib_dir")?;
    fs::remove_dir(tree.lib_dir()).context("Failed to remove shared/lib")?;
    let launcher = tree.install_launcher(config, "bin/dynexe")?;

    let output = run_launcher(&launcher, &["print-args"], &[])?;
    ensure!(output.exit_code == 1, "Expected exit code 1 but got {}", output.exit_code);
    ensure!(
        output.stderr.starts_with("ERROR: failed to read "),
        "Unexpected diagnostic: {}",
        output.stderr
    );

    println!("    PASS");
    Ok(())
}

/// Test: target not installed; the interpreter reports it
fn test_missing_target(config: &TestConfig) -> Result<()> {
    println!("  Running test: missing_target");

    let tree = RuntimeTree::new(&config.work_dir, "test_missing_target")?;
    tree.bundle_runtime(config)?;
    let launcher = tree.install_launcher(config, "bin/dynexe")?;

    let output = run_launcher(&launcher, &["not-installed"], &[])?;
    ensure!(output.exit_code != 0, "Missing target exited successfully");
    ensure!(output.stdout.is_empty(), "Unexpected stdout: {}", output.stdout);

    println!("    PASS");
    Ok(())
}

fn main() -> ExitCode {
    println!("=== dynexe Test Suite ===");
    println!();

    let config = match TestConfig::from_args(Args::parse()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    // Clean and recreate work directory
    if config.work_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&config.work_dir) {
            eprintln!("Warning: Failed to clean work dir: {}", e);
        }
    }
    if let Err(e) = fs::create_dir_all(&config.work_dir) {
        eprintln!("Error: Failed to create work dir: {}", e);
        return ExitCode::from(1);
    }

    println!("Configuration:");
    println!("  Launcher:      {}", config.launcher_path.display());
    println!("  Test binaries: {}", config.test_binaries_dir.display());
    println!("  Work dir:      {}", config.work_dir.display());
    println!("  Linker:        {}", config.linker_path.display());
    match &config.libc_path {
        Some(libc) => println!("  libc:          {}", libc.display()),
        None => println!("  libc:          <not bundled>"),
    }
    println!();

    let tests: Vec<(&str, fn(&TestConfig) -> Result<()>)> = vec![
        ("dispatch_by_argument", test_dispatch_by_argument),
        ("dispatch_by_identity", test_dispatch_by_identity),
        ("flat_layout", test_flat_layout),
        ("bundled_runtime_is_loaded", test_bundled_runtime_is_loaded),
        ("process_replaced", test_process_replaced),
        ("environment_passthrough", test_environment_passthrough),
        ("exit_status", test_exit_status),
        ("empty_lib_dir", test_empty_lib_dir),
        ("missing_lib_dir", test_missing_lib_dir),
        ("missing_target", test_missing_target),
    ];

    let mut passed = 0;
    let mut failed = 0;

    println!("Running {} tests...", tests.len());
    println!();

    for (name, test_fn) in &tests {
        match test_fn(&config) {
            Ok(()) => {
                passed += 1;
            }
            Err(e) => {
                println!("  FAILED ({}): {:#}", name, e);
                failed += 1;
            }
        }
    }

    println!();
    println!("=== Results ===");
    println!("Passed: {}", passed);
    println!("Failed: {}", failed);
    println!();

    if failed > 0 {
        ExitCode::from(1)
    } else {
        println!("All tests passed!");
        ExitCode::SUCCESS
    }
}
