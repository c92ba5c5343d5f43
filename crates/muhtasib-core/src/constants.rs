//! Shared constants

/// Webmail UI hosts. Links on these domains are pages, not attachment bytes,
/// and must go through the provider API instead of a plain GET.
pub const GMAIL_UI_HOSTS: &[&str] = &["mail.google.com"];

pub const OUTLOOK_UI_HOSTS: &[&str] = &[
    "outlook.live.com",
    "outlook.office.com",
    "outlook.office365.com",
];

pub const DEFAULT_GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com";
pub const DEFAULT_GRAPH_API_BASE_URL: &str = "https://graph.microsoft.com";
pub const DEFAULT_VIRUSTOTAL_BASE_URL: &str = "https://www.virustotal.com";

pub const DEFAULT_CLAMAV_HOST: &str = "127.0.0.1";
pub const DEFAULT_CLAMAV_PORT: u16 = 3310;

/// Prefix of the per-instance staging directory
pub const STAGING_DIR_PREFIX: &str = "muhtasib-staging-";

/// Returns true when `host` is one of the webmail UI domains (or a subdomain of one)
pub fn is_webmail_ui_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    GMAIL_UI_HOSTS
        .iter()
        .chain(OUTLOOK_UI_HOSTS.iter())
        .any(|ui| host == *ui || host.ends_with(&format!(".{}", ui)))
}
