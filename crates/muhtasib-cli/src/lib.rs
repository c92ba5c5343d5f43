use std::fmt::Write as _;
use std::io::Read;

use anyhow::Context;
use muhtasib_core::SourceDescriptor;
use muhtasib_services::{RedirectChain, UrlReputation};
use muhtasib_sources::{parse_source, split_inputs};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Classify command-line arguments plus any piped text. An argument may itself
/// hold several comma-separated links.
pub fn collect_sources(args: &[String], piped: Option<&str>) -> Vec<SourceDescriptor> {
    args.iter()
        .map(String::as_str)
        .chain(piped)
        .flat_map(split_inputs)
        .map(|input| parse_source(&input))
        .collect()
}

pub fn read_stdin() -> anyhow::Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read from stdin")?;
    Ok(text)
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// Outcome of `check-url`: the redirect chain and, when it resolved, VirusTotal's view
/// of the final URL
#[derive(Debug, Serialize)]
pub struct UrlCheck {
    pub url: String,
    pub redirects: RedirectChain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation: Option<UrlReputation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation_error: Option<String>,
}

impl UrlCheck {
    pub fn render_text(&self) -> String {
        let mut out = String::from("URL Check Result:\n\n");
        let Some(final_url) = &self.redirects.final_url else {
            let _ = writeln!(out, "Invalid or suspicious redirections for URL: {}", self.url);
            return out;
        };

        let _ = writeln!(out, "Initial URL: {}\n", self.url);
        if self.redirects.redirected() {
            out.push_str("Redirection Chain:\n");
            for hop in &self.redirects.hops {
                let _ = writeln!(out, "{}", hop);
            }
            out.push('\n');
        }
        let _ = writeln!(out, "Final URL after Redirection: {}\n", final_url);

        match (&self.reputation, &self.reputation_error) {
            (Some(reputation), _) => {
                let _ = writeln!(out, "{}", reputation.describe());
            }
            (None, Some(error)) => {
                let _ = writeln!(out, "VirusTotal check failed: {}", error);
            }
            (None, None) => {}
        }
        out
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM
pub fn cancel_on_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Shutdown requested; finishing in-flight work and cleaning up");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }
}
