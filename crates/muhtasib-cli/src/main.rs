//! Muhtasib CLI: scan email attachments with ClamAV, expand and rate links, and check
//! DKIM/SPF results in raw mail headers.
//!
//! Settings come from the environment or a `.env` file (CLAMAV_HOST, GMAIL_ACCESS_TOKEN,
//! VIRUSTOTAL_API_KEY, ...). Per-artifact failures are part of the report; the exit
//! code is non-zero only when a command cannot start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use muhtasib_cli::{cancel_on_shutdown, collect_sources, print_json, read_stdin, UrlCheck};
use muhtasib_core::{Config, SourceDescriptor};
use muhtasib_infra::{init_telemetry, shutdown_telemetry};
use muhtasib_processing::{analyze_headers, AttachmentPipeline};
use muhtasib_services::{RedirectResolver, ScanDaemonClient, VirusTotalClient};
use muhtasib_sources::{Fetchers, GmailClient, OutlookClient, StaticToken};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "muhtasib", about = "Email attachment and link analyzer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and scan attachments given as URLs or Gmail/Outlook links
    Scan {
        /// Links, each possibly holding several comma-separated entries
        inputs: Vec<String>,
        /// Also read comma- or newline-separated links from stdin
        #[arg(long)]
        stdin: bool,
        #[arg(long)]
        json: bool,
    },
    /// List Gmail attachments matching a search query
    DiscoverGmail {
        /// Gmail search, e.g. "has:attachment from:billing@example.com"
        query: String,
        /// Scan every attachment found instead of listing it
        #[arg(long)]
        scan: bool,
        #[arg(long)]
        json: bool,
    },
    /// List Outlook attachments matching a search query
    DiscoverOutlook {
        query: String,
        #[arg(long)]
        scan: bool,
        #[arg(long)]
        json: bool,
    },
    /// Check DKIM and SPF results in raw mail headers (stdin by default)
    Headers {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Expand redirects and ask VirusTotal about the final URL
    CheckUrl {
        url: String,
        #[arg(long)]
        json: bool,
    },
    /// Check that the ClamAV daemon answers
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("Invalid configuration")?;
    init_telemetry(config.log_format)?;

    let result = match cli.command {
        Commands::Scan {
            inputs,
            stdin,
            json,
        } => {
            let piped = if stdin { Some(read_stdin()?) } else { None };
            let sources = collect_sources(&inputs, piped.as_deref());
            if sources.is_empty() {
                anyhow::bail!("No attachment links given");
            }
            scan(&config, &sources, json).await
        }
        Commands::DiscoverGmail { query, scan, json } => {
            let token = config
                .gmail_access_token
                .clone()
                .context("GMAIL_ACCESS_TOKEN is not set")?;
            let client = GmailClient::new(
                &config.gmail_api_base_url,
                Arc::new(StaticToken::new(token)),
                fetch_timeout(&config),
            )?;
            let sources = client.discover(&query).await?;
            discovered(&config, sources, scan, json).await
        }
        Commands::DiscoverOutlook { query, scan, json } => {
            let token = config
                .outlook_access_token
                .clone()
                .context("OUTLOOK_ACCESS_TOKEN is not set")?;
            let client = OutlookClient::new(
                &config.graph_api_base_url,
                Arc::new(StaticToken::new(token)),
                fetch_timeout(&config),
            )?;
            let sources = client.discover(&query).await?;
            discovered(&config, sources, scan, json).await
        }
        Commands::Headers { file, json } => {
            let raw = match file {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => read_stdin()?,
            };
            let report = analyze_headers(&raw);
            if json {
                print_json(&report)
            } else {
                print!("DKIM/SPF Analysis Result:\n\n{}", report.render_text());
                Ok(())
            }
        }
        Commands::CheckUrl { url, json } => check_url(&config, url, json).await,
        Commands::Ping => {
            let scanner = ScanDaemonClient::from_config(&config);
            if scanner.ping().await {
                println!("ClamAV daemon is reachable");
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "ClamAV daemon at {} is not reachable",
                    config
                        .clamav_socket
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| config.clamav_address())
                ))
            }
        }
    };

    shutdown_telemetry();
    result
}

fn fetch_timeout(config: &Config) -> Duration {
    Duration::from_secs(config.fetch_timeout_secs)
}

async fn scan(config: &Config, sources: &[SourceDescriptor], json: bool) -> anyhow::Result<()> {
    let fetchers = Fetchers::from_config(config).context("Failed to build fetchers")?;
    let scanner = Arc::new(ScanDaemonClient::from_config(config));
    let pipeline = AttachmentPipeline::from_config(config, fetchers, scanner)?;

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    let report = pipeline.run(sources, &cancel).await?;
    if json {
        print_json(&report)
    } else {
        print!("{}", report.render_text());
        Ok(())
    }
}

async fn discovered(
    config: &Config,
    sources: Vec<SourceDescriptor>,
    run_scan: bool,
    json: bool,
) -> anyhow::Result<()> {
    if sources.is_empty() {
        println!("No attachments found");
        return Ok(());
    }
    if run_scan {
        return scan(config, &sources, json).await;
    }
    if json {
        return print_json(&sources);
    }
    for source in &sources {
        println!("{}", source);
    }
    Ok(())
}

async fn check_url(config: &Config, url: String, json: bool) -> anyhow::Result<()> {
    let resolver = RedirectResolver::new(fetch_timeout(config))?;
    let redirects = resolver.expand(&url).await?;

    let (reputation, reputation_error) = match &redirects.final_url {
        Some(final_url) => match VirusTotalClient::from_config(config) {
            Ok(client) => match client.url_report(final_url).await {
                Ok(reputation) => (Some(reputation), None),
                Err(e) => {
                    tracing::warn!(url = %final_url, error = %e, "VirusTotal lookup failed");
                    (None, Some(e.to_string()))
                }
            },
            Err(e) => (None, Some(e.to_string())),
        },
        None => (None, None),
    };

    let check = UrlCheck {
        url,
        redirects,
        reputation,
        reputation_error,
    };
    if json {
        print_json(&check)
    } else {
        print!("{}", check.render_text());
        Ok(())
    }
}
