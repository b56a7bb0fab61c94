//! Token refresh worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::authn::token_store::TokenStoreExt;

/// Token refresh worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Check interval
    pub check_interval: Duration,

    /// Refresh when token expires within this duration
    pub refresh_threshold: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            refresh_threshold: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Run the token refresh worker
pub async fn run<T, S, F>(
    options: &Options,
    tokens: &T,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    T: TokenStoreExt + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Token refresh worker starting...");

    loop {
        // Check for shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Token refresh worker shutting down...");
                return;
            }
            _ = sleep_fn(options.check_interval) => {
                // Continue with check
            }
        }

        refresh_if_expiring(options, tokens).await;
    }
}

/// One check; refreshes through the store's single-flight path
pub async fn refresh_if_expiring<T>(options: &Options, tokens: &T) -> bool
where
    T: TokenStoreExt + ?Sized,
{
    let status = tokens.status();
    if !status.has_tokens || status.reauthorization_required {
        debug!("No usable token, skipping proactive refresh");
        return false;
    }

    let threshold_secs = options.refresh_threshold.as_secs() as i64;
    if status.remaining_secs > threshold_secs {
        debug!("Token still valid, expires in {} minutes", status.remaining_secs / 60);
        return false;
    }

    info!(
        "Token expires within {} seconds, refreshing...",
        threshold_secs
    );
    match tokens.refresh().await {
        Ok(token) => {
            info!("Token refreshed, new expiration: {}", token.expires_at);
            true
        }
        Err(e) => {
            // the store latches reauthorization; the poller reports it
            error!("Failed to refresh token: {}", e);
            false
        }
    }
}
