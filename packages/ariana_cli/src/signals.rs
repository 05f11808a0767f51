//! Process signals the stream loops react to.

use anyhow::Result;

/// Fires when the process is resumed after a suspend (`SIGCONT`), which is
/// the terminal's version of coming back to the foreground.
#[cfg(unix)]
pub struct Resumed(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Resumed {
    pub fn install() -> Result<Self> {
        use anyhow::Context;
        use tokio::signal::unix::{SignalKind, signal};

        let kind = SignalKind::from_raw(nix::sys::signal::Signal::SIGCONT as i32);
        let sig = signal(kind).context("Failed to install SIGCONT handler")?;
        Ok(Self(sig))
    }

    pub async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
pub struct Resumed;

#[cfg(not(unix))]
impl Resumed {
    pub fn install() -> Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

/// Resolves on Ctrl-C. A failed handler install never resolves, so the
/// caller keeps running until killed.
pub async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
