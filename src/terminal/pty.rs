use std::ffi::{CStr, CString, OsStr};
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::Level;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::logging::SessionLogger;
use crate::terminal::error::{last_errno, TerminalError};
use crate::terminal::Result;

#[cfg(target_os = "macos")]
const FALLBACK_SHELL: &str = "/bin/zsh";
#[cfg(not(target_os = "macos"))]
const FALLBACK_SHELL: &str = "/bin/sh";

const READ_BUFFER_SIZE: usize = 65536;
const WRITE_POLL_TIMEOUT_MS: libc::c_int = 1000;
const EXEC_FAILED_STATUS: libc::c_int = 127;
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Output of the PTY read loop. `Terminated` is sent once, after the last
/// `Data`, when the child side has gone away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    Data(Vec<u8>),
    Terminated,
}

pub type PtyEventHandler = Box<dyn FnMut(PtyEvent) + Send + 'static>;

/// Picks the shell to run: explicit path, `$SHELL`, the passwd entry, and
/// finally a well-known system shell.
pub fn resolve_shell(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        return path.to_path_buf();
    }
    if let Some(shell) = std::env::var_os("SHELL").filter(|s| !s.is_empty()) {
        return PathBuf::from(shell);
    }
    passwd_shell().unwrap_or_else(|| PathBuf::from(FALLBACK_SHELL))
}

fn passwd_shell() -> Option<PathBuf> {
    let mut buf = vec![0 as c_char; 4096];
    let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwuid_r(
            libc::getuid(),
            &mut entry,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() || entry.pw_shell.is_null() {
        return None;
    }

    let shell = unsafe { CStr::from_ptr(entry.pw_shell) }.to_bytes();
    if shell.is_empty() {
        None
    } else {
        Some(PathBuf::from(OsStr::from_bytes(shell)))
    }
}

/// The forked shell as seen from the parent.
#[derive(Debug)]
pub struct ChildHandle {
    pid: libc::pid_t,
    exit_status: Option<i32>,
}

impl ChildHandle {
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.exit_status.is_none()
    }

    /// Non-blocking reap.
    fn try_wait(&mut self) -> Option<i32> {
        if self.exit_status.is_none() {
            let mut status: libc::c_int = 0;
            let waited = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
            if waited == self.pid {
                self.exit_status = Some(decode_wait_status(status));
            } else if waited < 0 {
                // Already reaped elsewhere (ECHILD); nothing left to track.
                self.exit_status = Some(-1);
            }
        }
        self.exit_status
    }

    /// Polls for exit until `timeout` passes. The master sees EOF before
    /// the child becomes reapable, so a single non-blocking wait is racy.
    fn wait_timeout(&mut self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }
    }

    /// SIGTERM, a short grace period, then SIGKILL and a blocking reap.
    fn terminate(&mut self) {
        if self.try_wait().is_some() {
            return;
        }
        unsafe {
            libc::kill(self.pid, libc::SIGTERM);
        }
        std::thread::sleep(Duration::from_millis(100));
        if self.try_wait().is_some() {
            return;
        }
        unsafe {
            libc::kill(self.pid, libc::SIGKILL);
            let mut status: libc::c_int = 0;
            if libc::waitpid(self.pid, &mut status, 0) == self.pid {
                self.exit_status = Some(decode_wait_status(status));
            } else {
                self.exit_status = Some(-1);
            }
        }
    }
}

fn decode_wait_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        -1
    }
}

/// Pseudo-terminal pair plus the login shell attached to it.
pub struct PtySession {
    master: Option<OwnedFd>,
    writer: Option<File>,
    reader: Option<JoinHandle<()>>,
    child: Option<ChildHandle>,
    rows: u16,
    columns: u16,
    term: String,
    logger: Arc<dyn SessionLogger>,
}

impl PtySession {
    pub fn new(rows: u16, columns: u16, term: impl Into<String>, logger: Arc<dyn SessionLogger>) -> Self {
        Self {
            master: None,
            writer: None,
            reader: None,
            child: None,
            rows: rows.max(1),
            columns: columns.max(1),
            term: term.into(),
            logger,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.master.is_some()
    }

    /// `(rows, columns)` last applied to the PTY.
    pub fn size(&self) -> (u16, u16) {
        (self.rows, self.columns)
    }

    pub fn child_pid(&self) -> Option<libc::pid_t> {
        self.child.as_ref().map(ChildHandle::pid)
    }

    pub fn is_child_running(&self) -> bool {
        self.child.as_ref().is_some_and(ChildHandle::is_running)
    }

    /// Reaps the child if it has exited and returns its status.
    pub fn exit_status(&mut self) -> Option<i32> {
        self.child.as_mut().and_then(ChildHandle::try_wait)
    }

    /// Like `exit_status`, but keeps polling for up to `timeout` while the
    /// child is still exiting.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<i32> {
        self.child.as_mut().and_then(|child| child.wait_timeout(timeout))
    }

    /// Spawns the login shell on a fresh PTY and starts reading from it on
    /// `runtime`. `handler` receives every event from the read loop.
    pub fn initialize(&mut self, shell: Option<&Path>, handler: PtyEventHandler, runtime: &Handle) -> Result<()> {
        if self.master.is_some() {
            return Err(TerminalError::AlreadyInitialized);
        }

        let shell = resolve_shell(shell);
        let plan = ExecPlan::new(&shell, &self.term, self.rows, self.columns)?;

        let mut win_size = libc::winsize {
            ws_row: self.rows,
            ws_col: self.columns,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let mut master_fd: libc::c_int = -1;

        let child_pid = unsafe {
            libc::forkpty(
                &mut master_fd,
                std::ptr::null_mut(),
                std::ptr::null_mut::<libc::termios>(),
                &mut win_size,
            )
        };

        if child_pid < 0 {
            return Err(TerminalError::PtyCreationFailed(last_errno()));
        }
        if child_pid == 0 {
            unsafe { exec_child(&plan) }
        }

        // Parent from here on.
        let master = unsafe { OwnedFd::from_raw_fd(master_fd) };
        self.child = Some(ChildHandle {
            pid: child_pid,
            exit_status: None,
        });
        self.logger.log(
            Level::Info,
            format_args!("spawned {} (pid {}) on a {}x{} pty", shell.display(), child_pid, self.rows, self.columns),
        );

        if let Err(e) = self.attach(master, handler, runtime) {
            self.teardown();
            return Err(e);
        }
        Ok(())
    }

    fn attach(&mut self, master: OwnedFd, handler: PtyEventHandler, runtime: &Handle) -> Result<()> {
        set_nonblocking(master.as_raw_fd())?;
        let reader_fd = master.try_clone().map_err(creation_error)?;
        let writer = File::from(master.try_clone().map_err(creation_error)?);

        let logger = self.logger.clone();
        self.reader = Some(runtime.spawn(read_loop(reader_fd, handler, logger)));
        self.writer = Some(writer);
        self.master = Some(master);
        Ok(())
    }

    /// Writes raw bytes to the master side.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer: &File = self.writer.as_ref().ok_or(TerminalError::NotInitialized)?;
        let fd = writer.as_raw_fd();

        let mut remaining = data;
        while !remaining.is_empty() {
            match writer.write(remaining) {
                Ok(0) => return Err(TerminalError::WriteFailed(io::ErrorKind::WriteZero.into())),
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait_writable(fd)?,
                Err(e) => return Err(TerminalError::WriteFailed(e)),
            }
        }
        Ok(())
    }

    /// Single non-blocking attempt, for callers that must not stall on a
    /// full PTY buffer. Fails with `WouldBlock` instead of waiting.
    pub fn try_write(&self, data: &[u8]) -> Result<()> {
        let mut writer: &File = self.writer.as_ref().ok_or(TerminalError::NotInitialized)?;
        let mut remaining = data;
        while !remaining.is_empty() {
            match writer.write(remaining) {
                Ok(0) => return Err(TerminalError::WriteFailed(io::ErrorKind::WriteZero.into())),
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TerminalError::WriteFailed(e)),
            }
        }
        Ok(())
    }

    /// Sets the window size and tells the child about it.
    pub fn resize(&mut self, rows: u16, columns: u16) -> Result<()> {
        self.apply_window_size(rows, columns)?;
        self.signal_window_change();
        Ok(())
    }

    /// The ioctl half of `resize`.
    pub fn apply_window_size(&mut self, rows: u16, columns: u16) -> Result<()> {
        let master = self.master.as_ref().ok_or(TerminalError::NotInitialized)?;
        let win_size = libc::winsize {
            ws_row: rows.max(1),
            ws_col: columns.max(1),
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let result = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, &win_size) };
        if result < 0 {
            return Err(TerminalError::ResizeFailed(last_errno()));
        }
        self.rows = win_size.ws_row;
        self.columns = win_size.ws_col;
        Ok(())
    }

    /// The SIGWINCH half of `resize`, sent to the child's process group.
    pub fn signal_window_change(&self) {
        if let Some(child) = self.child.as_ref().filter(|c| c.is_running()) {
            let rc = unsafe { libc::kill(-child.pid, libc::SIGWINCH) };
            if rc < 0 {
                unsafe {
                    libc::kill(child.pid, libc::SIGWINCH);
                }
            }
        }
    }

    pub fn send_signal(&self, signal: libc::c_int) -> Result<()> {
        let child = self.child.as_ref().ok_or(TerminalError::NotInitialized)?;
        if !child.is_running() {
            return Err(TerminalError::Terminated);
        }
        if unsafe { libc::kill(child.pid, signal) } < 0 {
            return Err(TerminalError::SignalFailed {
                signal,
                errno: last_errno(),
            });
        }
        Ok(())
    }

    /// Stops reading, closes every descriptor once and terminates the
    /// child if it is still running. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer.take();
        self.master.take();

        if let Some(child) = self.child.as_mut() {
            if child.is_running() {
                child.terminate();
                self.logger.log(
                    Level::Debug,
                    format_args!("child {} finished with status {:?}", child.pid, child.exit_status),
                );
            }
        }
    }

    /// A session around an existing master descriptor with no child.
    #[cfg(test)]
    pub(crate) fn with_master(master: OwnedFd, rows: u16, columns: u16, logger: Arc<dyn SessionLogger>) -> Self {
        let mut session = Self::new(rows, columns, "xterm-256color", logger);
        session.writer = master.try_clone().ok().map(File::from);
        session.master = Some(master);
        session
    }

    /// Get the raw master descriptor for external polling.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.master.as_ref().map(AsRawFd::as_raw_fd)
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn creation_error(e: io::Error) -> TerminalError {
    TerminalError::PtyCreationFailed(e.raw_os_error().unwrap_or(0))
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(TerminalError::PtyCreationFailed(last_errno()));
        }
    }
    Ok(())
}

fn wait_writable(fd: RawFd) -> Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pollfd, 1, WRITE_POLL_TIMEOUT_MS) };
    match ready {
        n if n > 0 => Ok(()),
        0 => Err(TerminalError::WriteFailed(io::ErrorKind::TimedOut.into())),
        _ => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                Ok(())
            } else {
                Err(TerminalError::WriteFailed(err))
            }
        }
    }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let result = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result as usize)
    }
}

async fn read_loop(fd: OwnedFd, mut handler: PtyEventHandler, logger: Arc<dyn SessionLogger>) {
    let async_fd = match AsyncFd::with_interest(fd, Interest::READABLE) {
        Ok(async_fd) => async_fd,
        Err(e) => {
            logger.log(Level::Error, format_args!("cannot watch pty master: {}", e));
            handler(PtyEvent::Terminated);
            return;
        }
    };

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                logger.log(Level::Error, format_args!("pty readiness failed: {}", e));
                break;
            }
        };

        match guard.try_io(|inner| read_fd(inner.get_ref().as_raw_fd(), &mut buf)) {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => handler(PtyEvent::Data(buf[..n].to_vec())),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => {
                // Linux reports a hung-up slave as EIO rather than EOF.
                if e.raw_os_error() != Some(libc::EIO) {
                    logger.log(Level::Warn, format_args!("pty read failed: {}", e));
                }
                break;
            }
            Err(_would_block) => continue,
        }
    }

    logger.log(Level::Debug, format_args!("pty reached end of file"));
    handler(PtyEvent::Terminated);
}

/// Everything the child needs, allocated before fork so the child branch
/// only makes async-signal-safe calls.
struct ExecPlan {
    program: CString,
    _args: Vec<CString>,
    _env: Vec<CString>,
    argv: Vec<*const c_char>,
    envp: Vec<*const c_char>,
    diagnostic: Vec<u8>,
}

impl ExecPlan {
    fn new(shell: &Path, term: &str, rows: u16, columns: u16) -> Result<Self> {
        let program = to_cstring(shell.as_os_str().as_bytes())?;
        let args = vec![program.clone(), to_cstring(b"-l")?];

        let overridden = ["TERM", "COLUMNS", "LINES"];
        let mut env = Vec::new();
        for (key, value) in std::env::vars_os() {
            if overridden.iter().any(|k| key.as_bytes() == k.as_bytes()) {
                continue;
            }
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            // Entries with interior NULs cannot be passed through execve.
            if let Ok(entry) = CString::new(entry) {
                env.push(entry);
            }
        }
        env.push(to_cstring(format!("TERM={}", term).as_bytes())?);
        env.push(to_cstring(format!("COLUMNS={}", columns).as_bytes())?);
        env.push(to_cstring(format!("LINES={}", rows).as_bytes())?);

        let argv = args.iter().map(|a| a.as_ptr()).chain(std::iter::once(std::ptr::null())).collect();
        let envp = env.iter().map(|e| e.as_ptr()).chain(std::iter::once(std::ptr::null())).collect();
        let diagnostic = format!("ide-terminal: failed to exec {}\r\n", shell.display()).into_bytes();

        Ok(Self {
            program,
            _args: args,
            _env: env,
            argv,
            envp,
            diagnostic,
        })
    }
}

fn to_cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|e| TerminalError::InvalidData(e.to_string()))
}

/// Child branch of the fork. Replaces the process image with the shell or
/// exits; control never returns to the caller.
unsafe fn exec_child(plan: &ExecPlan) -> ! {
    libc::execve(plan.program.as_ptr(), plan.argv.as_ptr(), plan.envp.as_ptr());
    // stderr is the pty slave by now, so this lands in the terminal.
    libc::write(
        libc::STDERR_FILENO,
        plan.diagnostic.as_ptr() as *const libc::c_void,
        plan.diagnostic.len(),
    );
    libc::_exit(EXEC_FAILED_STATUS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogger;
    use crate::runtime::io_handle;
    use std::sync::mpsc;

    fn session() -> PtySession {
        PtySession::new(24, 80, "xterm-256color", Arc::new(NullLogger))
    }

    fn channel_handler() -> (PtyEventHandler, mpsc::Receiver<PtyEvent>) {
        let (tx, rx) = mpsc::channel();
        let handler: PtyEventHandler = Box::new(move |event| {
            let _ = tx.send(event);
        });
        (handler, rx)
    }

    /// Collects output until `needle` shows up or the child goes away.
    fn read_until(rx: &mpsc::Receiver<PtyEvent>, needle: &str) -> (String, bool) {
        let mut output = String::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(10)) {
            match event {
                PtyEvent::Data(data) => {
                    output.push_str(&String::from_utf8_lossy(&data));
                    if output.contains(needle) {
                        return (output, false);
                    }
                }
                PtyEvent::Terminated => return (output, true),
            }
        }
        (output, false)
    }

    #[test]
    fn test_resolve_shell_prefers_explicit() {
        assert_eq!(resolve_shell(Some(Path::new("/bin/dash"))), PathBuf::from("/bin/dash"));
        assert!(!resolve_shell(None).as_os_str().is_empty());
        assert!(!resolve_shell(Some(Path::new(""))).as_os_str().is_empty());
    }

    #[test]
    fn test_operations_require_initialize() {
        let mut pty = session();
        assert!(matches!(pty.write(b"ls\r"), Err(TerminalError::NotInitialized)));
        assert!(matches!(pty.resize(10, 10), Err(TerminalError::NotInitialized)));
        assert!(matches!(pty.send_signal(libc::SIGINT), Err(TerminalError::NotInitialized)));
        assert_eq!(pty.raw_fd(), None);
    }

    #[test]
    fn test_teardown_without_initialize_is_noop() {
        let mut pty = session();
        pty.teardown();
        pty.teardown();
        assert!(!pty.is_initialized());
    }

    #[test]
    fn test_exec_plan_rejects_nul() {
        let err = ExecPlan::new(Path::new("/bin/s\0h"), "xterm-256color", 24, 80).err();
        assert!(matches!(err, Some(TerminalError::InvalidData(_))));
    }

    #[test]
    fn test_exec_plan_environment() {
        let plan = ExecPlan::new(Path::new("/bin/sh"), "xterm-256color", 30, 100).unwrap();
        let env: Vec<String> = plan._env.iter().map(|e| e.to_string_lossy().into_owned()).collect();
        assert!(env.contains(&"TERM=xterm-256color".to_string()));
        assert!(env.contains(&"COLUMNS=100".to_string()));
        assert!(env.contains(&"LINES=30".to_string()));
        assert_eq!(env.iter().filter(|e| e.starts_with("TERM=")).count(), 1);
        assert_eq!(plan.argv.len(), 3);
        assert!(plan.argv[2].is_null());
        assert!(plan.envp.last().is_some_and(|p| p.is_null()));
    }

    #[test]
    fn test_spawn_echo_and_exit() {
        let mut pty = session();
        let (handler, rx) = channel_handler();
        pty.initialize(Some(Path::new("/bin/sh")), handler, &io_handle()).unwrap();
        assert!(pty.is_initialized());
        assert!(pty.child_pid().is_some());

        pty.write(b"echo $((6*7))\n").unwrap();
        let (output, terminated) = read_until(&rx, "42");
        assert!(!terminated, "shell exited early: {:?}", output);
        assert!(output.contains("42"));

        pty.resize(40, 120).unwrap();
        assert_eq!(pty.size(), (40, 120));

        pty.write(b"exit\n").unwrap();
        let (_, terminated) = read_until(&rx, "\u{0}never");
        assert!(terminated);

        pty.teardown();
        pty.teardown();
        assert!(!pty.is_child_running());
        assert!(matches!(pty.write(b"x"), Err(TerminalError::NotInitialized)));
    }

    #[test]
    fn test_initialize_twice_rejected() {
        let mut pty = session();
        let (handler, _rx) = channel_handler();
        pty.initialize(Some(Path::new("/bin/sh")), handler, &io_handle()).unwrap();
        let (handler, _rx2) = channel_handler();
        let err = pty.initialize(Some(Path::new("/bin/sh")), handler, &io_handle()).err();
        assert!(matches!(err, Some(TerminalError::AlreadyInitialized)));
    }

    #[test]
    fn test_exec_failure_reports_and_exits() {
        let script = std::env::temp_dir().join(format!("ide-terminal-noexec-{}", std::process::id()));
        std::fs::write(&script, b"echo never\n").unwrap();

        let mut pty = session();
        let (handler, rx) = channel_handler();
        pty.initialize(Some(&script), handler, &io_handle()).unwrap();

        let (output, terminated) = read_until(&rx, "failed to exec");
        assert!(output.contains("failed to exec"), "unexpected output: {:?}", output);
        if !terminated {
            let (_, terminated) = read_until(&rx, "\u{0}never");
            assert!(terminated);
        }
        assert_eq!(pty.wait_for_exit(Duration::from_secs(5)), Some(EXEC_FAILED_STATUS));
        assert!(!pty.is_child_running());

        std::fs::remove_file(&script).unwrap();
    }

    #[test]
    fn test_window_size_failure_keeps_previous_size() {
        let not_a_tty = OwnedFd::from(File::open("/dev/null").unwrap());
        let mut pty = PtySession::with_master(not_a_tty, 24, 80, Arc::new(NullLogger));

        let err = pty.apply_window_size(50, 132).unwrap_err();
        assert!(matches!(err, TerminalError::ResizeFailed(errno) if errno == libc::ENOTTY));
        assert!(!err.is_fatal());
        assert_eq!(pty.size(), (24, 80));
    }

    #[test]
    fn test_try_write_requires_initialize() {
        let pty = session();
        assert!(matches!(pty.try_write(b"\x1b[0n"), Err(TerminalError::NotInitialized)));
    }
}
