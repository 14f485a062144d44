// End-to-end launches of the real binary. A shell script stands in for the
// dynamic linker and prints the argv it was given, one entry per line.
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::ptr;

const FAKE_LINKER: &str = "#!/bin/sh\nprintf '%s\\n' \"$0\" \"$@\"\nprintf 'ENV:%s\\n' \"${DYNEXE_MARKER-<unset>}\"\n";

// Dumps the environment block the kernel handed over, one entry per line.
const ENVIRON_LINKER: &str = "#!/bin/sh\ntr '\\000' '\\n' < /proc/$$/environ\n";

struct Install {
    _temp: tempfile::TempDir,
    root: PathBuf,
}

impl Install {
    /// `<root>/bin/dynexe` plus empty `shared/bin` and `shared/lib`.
    fn new() -> Self {
        let temp = tempfile::Builder::new()
            .prefix("dynexe-launch")
            .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
            .expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonical root");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join("shared/bin")).unwrap();
        fs::create_dir_all(root.join("shared/lib")).unwrap();
        install_launcher(&root.join("bin/dynexe"));
        Self { _temp: temp, root }
    }

    fn lib_dir(&self) -> PathBuf {
        self.root.join("shared/lib")
    }

    fn fake_linker(&self, name: &str) -> PathBuf {
        let path = self.lib_dir().join(name);
        write_executable(&path, FAKE_LINKER);
        path
    }

    fn launcher(&self) -> PathBuf {
        self.root.join("bin/dynexe")
    }
}

// A hard link keeps /proc/self/exe pointing into the scratch root without
// leaving a writable copy around while other tests fork.
fn install_launcher(dest: &Path) {
    let built = env!("CARGO_BIN_EXE_dynexe");
    if fs::hard_link(built, dest).is_err() {
        fs::copy(built, dest).expect("copy launcher");
    }
}

/// Spawn `program` with an exact argv and envp, bypassing `std::env`
/// (which cannot express entries without '='). Returns (status, stdout).
fn spawn_raw(program: &Path, argv: &[&str], envp: &[&str]) -> io::Result<(i32, Vec<u8>)> {
    let c_program = CString::new(program.as_os_str().as_bytes())?;
    let c_argv: Vec<CString> = argv.iter().map(|a| CString::new(*a)).collect::<Result<_, _>>()?;
    let c_envp: Vec<CString> = envp.iter().map(|e| CString::new(*e)).collect::<Result<_, _>>()?;
    let argv_ptrs: Vec<*mut libc::c_char> = c_argv
        .iter()
        .map(|a| a.as_ptr() as *mut libc::c_char)
        .chain(Some(ptr::null_mut()))
        .collect();
    let envp_ptrs: Vec<*mut libc::c_char> = c_envp
        .iter()
        .map(|e| e.as_ptr() as *mut libc::c_char)
        .chain(Some(ptr::null_mut()))
        .collect();

    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: plain libc calls on locals; every pointer outlives the spawn.
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
        libc::posix_spawn_file_actions_init(&mut actions);
        libc::posix_spawn_file_actions_adddup2(&mut actions, fds[1], libc::STDOUT_FILENO);
        libc::posix_spawn_file_actions_addclose(&mut actions, fds[0]);
        libc::posix_spawn_file_actions_addclose(&mut actions, fds[1]);

        let mut pid: libc::pid_t = 0;
        let rc = libc::posix_spawn(
            &mut pid,
            c_program.as_ptr(),
            &actions,
            ptr::null(),
            argv_ptrs.as_ptr(),
            envp_ptrs.as_ptr(),
        );
        libc::posix_spawn_file_actions_destroy(&mut actions);
        libc::close(fds[1]);
        if rc != 0 {
            libc::close(fds[0]);
            return Err(io::Error::from_raw_os_error(rc));
        }

        let mut stdout = Vec::new();
        File::from_raw_fd(fds[0]).read_to_end(&mut stdout)?;

        let mut status: libc::c_int = 0;
        if libc::waitpid(pid, &mut status, 0) != pid {
            return Err(io::Error::last_os_error());
        }
        let code = if libc::WIFEXITED(status) { libc::WEXITSTATUS(status) } else { -1 };
        Ok((code, stdout))
    }
}

fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

fn lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn dispatch_by_argument_builds_linker_argv() {
    let install = Install::new();
    let linker = install.fake_linker("ld-linux-x86-64.so.2");
    fs::write(install.lib_dir().join("libc.so.6"), b"").unwrap();

    let output = Command::new(install.launcher())
        .args(["mytool", "--flag", "val"])
        .output()
        .expect("run dynexe");

    assert!(output.status.success(), "{}", stderr(&output));
    let root = install.root.display();
    assert_eq!(
        lines(&output),
        [
            linker.display().to_string(),
            "--library-path".to_string(),
            format!("{root}/shared/lib"),
            format!("{root}/shared/bin/mytool"),
            "--flag".to_string(),
            "val".to_string(),
            "ENV:<unset>".to_string(),
        ]
    );
}

#[test]
fn dispatch_by_identity_forwards_everything() {
    let install = Install::new();
    install.fake_linker("ld-musl-x86_64.so.1");
    symlink("dynexe", install.root.join("bin/mytool")).unwrap();

    let output = Command::new(install.root.join("bin/mytool"))
        .args(["dynexe", "a b", ""])
        .output()
        .expect("run mytool");

    assert!(output.status.success(), "{}", stderr(&output));
    let lines = lines(&output);
    assert_eq!(lines[3], format!("{}/shared/bin/mytool", install.root.display()));
    assert_eq!(&lines[4..7], ["dynexe", "a b", ""]);
}

#[test]
fn flat_layout_uses_launcher_directory() {
    let install = Install::new();
    install.fake_linker("ld-linux-aarch64.so.1");
    let flat = install.root.join("dynexe");
    install_launcher(&flat);

    let output = Command::new(&flat).arg("tool").output().expect("run dynexe");

    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(lines(&output)[3], format!("{}/shared/bin/tool", install.root.display()));
}

#[test]
fn environment_is_passed_through() {
    let install = Install::new();
    install.fake_linker("ld-linux-x86-64.so.2");

    let output = Command::new(install.launcher())
        .arg("tool")
        .env("DYNEXE_MARKER", "from-parent")
        .output()
        .expect("run dynexe");

    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(lines(&output).last().map(String::as_str), Some("ENV:from-parent"));
}

#[test]
fn environment_block_is_passed_verbatim() {
    let install = Install::new();
    write_executable(&install.lib_dir().join("ld-linux-x86-64.so.2"), ENVIRON_LINKER);

    let envp = ["NO_EQUALS_SIGN", "GOOD=1", "EMPTY=", "=leading"];
    let (code, stdout) = spawn_raw(&install.launcher(), &["dynexe", "tool"], &envp).expect("spawn dynexe");

    assert_eq!(code, 0);
    let received: Vec<String> = String::from_utf8_lossy(&stdout)
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(received, envp);
}

#[test]
fn several_linkers_still_launch_through_one() {
    let install = Install::new();
    let first = install.fake_linker("ld-linux-x86-64.so.2");
    let second = install.fake_linker("ld-musl-x86_64.so.1");

    let output = Command::new(install.launcher()).arg("tool").output().expect("run dynexe");

    assert!(output.status.success(), "{}", stderr(&output));
    let used = PathBuf::from(&lines(&output)[0]);
    assert!(used == first || used == second, "unexpected linker {}", used.display());
}

#[test]
fn empty_lib_dir_reports_path() {
    let install = Install::new();

    let output = Command::new(install.launcher()).arg("tool").output().expect("run dynexe");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let message = stderr(&output);
    assert!(
        message.contains(&format!("no valid linker found in {}", install.lib_dir().display())),
        "{message}"
    );
}

#[test]
fn missing_lib_dir_reports_os_error() {
    let install = Install::new();
    fs::remove_dir(install.lib_dir()).unwrap();

    let output = Command::new(install.launcher()).arg("tool").output().expect("run dynexe");

    assert_eq!(output.status.code(), Some(1));
    let message = stderr(&output);
    assert!(message.contains(&format!("failed to read {}", install.lib_dir().display())), "{message}");
    assert!(message.contains("No such file or directory"), "{message}");
}

#[test]
fn lib_dir_that_is_a_file_reports_not_a_directory() {
    let install = Install::new();
    fs::remove_dir(install.lib_dir()).unwrap();
    fs::write(install.lib_dir(), b"").unwrap();

    let output = Command::new(install.launcher()).arg("tool").output().expect("run dynexe");

    assert_eq!(output.status.code(), Some(1));
    let message = stderr(&output);
    assert!(message.contains(&format!("failed to read {}", install.lib_dir().display())), "{message}");
    assert!(message.contains("Not a directory"), "{message}");
}

#[test]
fn unexecutable_linker_reports_exec_failure() {
    let install = Install::new();
    let linker = install.lib_dir().join("ld-linux-x86-64.so.2");
    fs::write(&linker, FAKE_LINKER).unwrap();
    fs::set_permissions(&linker, fs::Permissions::from_mode(0o644)).unwrap();

    let output = Command::new(install.launcher()).arg("tool").output().expect("run dynexe");

    assert_eq!(output.status.code(), Some(1));
    let message = stderr(&output);
    assert!(message.contains(&format!("failed to execute {}", linker.display())), "{message}");
}
