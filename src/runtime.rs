use std::sync::OnceLock;

use tokio::runtime::Handle;

/// Shared runtime for PTY I/O when the host has no tokio context of its own.
fn shared_runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ide-terminal-io")
            .enable_all()
            .build()
            .expect("Failed to create terminal I/O runtime")
    })
}

/// Handle to the caller's runtime if there is one, else the shared one.
pub(crate) fn io_handle() -> Handle {
    Handle::try_current().unwrap_or_else(|_| shared_runtime().handle().clone())
}
