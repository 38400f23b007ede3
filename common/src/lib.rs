//! Ambient startup/shutdown helpers shared by the operator binary: a tiny
//! crate with a handful of free functions rather than a shared "framework"
//! type.

pub mod shutdown;

use owo_colors::OwoColorize;

/// Early-process initialization, called first thing in `main`. Ensures a
/// backtrace is captured on panic unless the operator explicitly opted out.
pub fn init() {
    if std::env::var_os("RUST_BACKTRACE").is_none() {
        // SAFETY: called once at the very start of `main`, before any other
        // thread is spawned, so there is no concurrent access to the
        // environment.
        unsafe {
            std::env::set_var("RUST_BACKTRACE", "1");
        }
    }
}

/// Prints a colorized readiness banner and, if `READINESS_FILE` is set,
/// touches that path so an external liveness/readiness probe can observe it.
pub fn signal_ready() {
    println!("{}", "✅ Ready".green());
    if let Ok(path) = std::env::var("READINESS_FILE") {
        if let Err(err) = std::fs::write(&path, b"ready") {
            eprintln!(
                "{}",
                format!("⚠️  Failed to write readiness file {path}: {err}").yellow()
            );
        }
    }
}
