//! Startup gate example.
//!
//! Runs the license check and an update check the way a desktop shell would
//! at launch, then keeps checking in the background.
//!
//! # Running
//!
//! ```bash
//! export SAKURA_INSTALL_DIR=/opt/sakura-pos
//! export SAKURA_MANIFEST_URL=https://updates.example.com/update.json
//! export LICENSE_KEY="SAKURA-XXXX-XXXX"   # only needed on first launch
//! RUST_LOG=tollgate=debug cargo run --example startup_gate
//! ```

use std::sync::Arc;
use std::time::Duration;
use tollgate::{
    AppContext, BlockReason, DownloadOutcome, InteractionGate, TollgateConfig, TollgateError,
    UpdatePayload,
};
use tracing_subscriber::EnvFilter;

/// Stands in for the modal a real shell would raise.
struct ConsoleGate;

impl InteractionGate for ConsoleGate {
    fn block(&self, reason: BlockReason) {
        match reason {
            BlockReason::License { reason, message } => {
                eprintln!("✗ License problem ({}): {}", reason, message);
            }
            BlockReason::MandatoryUpdate {
                current, required, ..
            } => {
                eprintln!("✗ Version {} is no longer supported, {} required", current, required);
            }
        }
    }

    fn unblock(&self) {
        println!("✓ Ready");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        eprintln!("Startup failed [{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), TollgateError> {
    let install_dir =
        std::env::var("SAKURA_INSTALL_DIR").unwrap_or_else(|_| "/opt/sakura-pos".to_string());

    let mut config = TollgateConfig::new("sakura-pos", env!("CARGO_PKG_VERSION"), install_dir)?;
    config.manifest_url = std::env::var("SAKURA_MANIFEST_URL").ok();
    config.check_interval = Duration::from_secs(15 * 60);

    let context = Arc::new(AppContext::new(config, Arc::new(ConsoleGate))?);

    // License first: nothing else matters without it.
    let mut verdict = context.check_license().await;
    if !verdict.valid {
        if let Ok(key) = std::env::var("LICENSE_KEY") {
            verdict = context.activate_license(&key).await?;
        }
    }
    if !verdict.valid {
        return Ok(());
    }

    if context.config().manifest_url.is_none() {
        println!("No manifest configured, skipping update check");
        return Ok(());
    }

    let decision = match context.check_for_update().await {
        Ok(decision) => decision,
        Err(e) if e.is_transient() => {
            eprintln!("Update server unreachable, continuing offline: {}", e);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if decision.available {
        println!("Update {} available: {}", decision.version, decision.reason);
        for line in &decision.changelog {
            println!("  - {}", line);
        }

        let handle = context.updates().start_download(&decision)?;
        let mut progress = handle.progress();
        let printer = tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                if let Some(percent) = *progress.borrow() {
                    println!("  downloading... {}%", percent);
                }
            }
        });

        match handle.wait().await? {
            DownloadOutcome::Completed { path, .. } => {
                let report = context
                    .apply_update(UpdatePayload::Archive(path), &decision.version)
                    .await?;
                println!("✓ Updated {} file(s)", report.files_updated.len());
            }
            DownloadOutcome::ManualDownload { url } => {
                println!("Download the update by hand from {}", url);
            }
        }
        printer.abort();
    }

    let interval = context.config().check_interval;
    let background = context.spawn_periodic_update_check(interval);
    println!("Background checks every {}s (Ctrl+C to quit)", interval.as_secs());

    let _ = tokio::signal::ctrl_c().await;
    background.abort();
    Ok(())
}
