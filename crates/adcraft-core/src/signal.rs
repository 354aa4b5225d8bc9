use adcraft_render::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Cancel `token` on the first Ctrl-C; exit immediately on the second.
///
/// Only the first call installs a handler; later calls are ignored.
pub fn install_interrupt_handler(token: &CancelToken) {
    let token = token.clone();
    let _ = ctrlc::set_handler(move || {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        token.cancel();
        eprintln!("\ninterrupt received, stopping after the current step...");
    });
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
