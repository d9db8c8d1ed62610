use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;

/// Returns a token cancelled on the first Ctrl+C. A second Ctrl+C exits
/// immediately.
pub(crate) fn install_interrupt_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "cannot listen for Ctrl+C");
                return;
            }

            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::warn!(
                    "Interrupted, cancelling pending requests (Ctrl+C again to force exit)"
                );
                handler_token.cancel();
            } else {
                std::process::exit(130);
            }
        }
    });

    token
}
