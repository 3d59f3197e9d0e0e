//! Ctrl-C handling
//!
//! The first SIGINT flips the run's cancel token so in-flight provider calls
//! finish and their state is committed. The handler then restores the
//! default action, so a second SIGINT terminates immediately.

use declarative::CancelToken;
use std::sync::OnceLock;

static TOKEN: OnceLock<CancelToken> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    if let Some(token) = TOKEN.get() {
        token.cancel();
    }
    // SAFETY: signal() is async-signal-safe
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

/// Install the handler and return the token it controls
pub fn install() -> CancelToken {
    let token = TOKEN.get_or_init(CancelToken::new).clone();

    #[cfg(unix)]
    {
        let handler = on_sigint as extern "C" fn(libc::c_int);
        // SAFETY: the handler only touches atomics and async-signal-safe calls
        let previous = unsafe { libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            log::warn!("Could not install SIGINT handler; Ctrl-C will abort immediately");
        } else {
            log::debug!("Installed SIGINT handler");
        }
    }

    token
}
