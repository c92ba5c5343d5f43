//! DKIM / SPF inspection of pasted mail headers.
//!
//! Everything here is textual. The DKIM check corroborates the `Authentication-Results`
//! header added by a receiving server; it does not verify the signature itself.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Header families kept by [`filter`]
pub const RELEVANT_HEADERS: &[&str] = &[
    "Received-SPF",
    "Authentication-Results",
    "DKIM-Signature",
    "Received",
];

static SPF_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Received-SPF:\s*(pass|fail|neutral|softfail)\b.*?client-ip=([0-9a-f.:]+)")
        .expect("SPF pattern is valid")
});

static DKIM_PASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Authentication-Results:.*\bdkim=pass\b").expect("DKIM pattern is valid")
});

/// Join folded continuation lines onto their header line.
///
/// A line starting with a space or tab continues the previous line; the pieces are
/// trimmed and joined with one space.
pub fn unfold(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.lines() {
        let is_continuation = line.starts_with(' ') || line.starts_with('\t');
        let piece = line.trim();
        match lines.last_mut() {
            Some(current) if is_continuation => {
                if !piece.is_empty() {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(piece);
                }
            }
            _ => lines.push(piece.to_string()),
        }
    }
    lines.retain(|l| !l.is_empty());
    lines.join("\n")
}

/// Name of the header a logical line starts, if any
fn header_name(line: &str) -> Option<&str> {
    let (name, _) = line.split_once(':')?;
    let name = name.trim_end();
    (!name.is_empty() && !name.contains(char::is_whitespace)).then_some(name)
}

/// Unfolded text plus the lines worth inspecting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderSet {
    pub unfolded: String,
    pub relevant: Vec<String>,
}

/// Keep only lines that start with one of [`RELEVANT_HEADERS`], ignoring case
pub fn filter(unfolded: &str) -> HeaderSet {
    let relevant = unfolded
        .lines()
        .filter(|line| {
            RELEVANT_HEADERS.iter().any(|wanted| {
                line.get(..wanted.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(wanted))
            })
        })
        .map(str::to_string)
        .collect();

    HeaderSet {
        unfolded: unfolded.to_string(),
        relevant,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DkimVerdict {
    /// No `DKIM-Signature` header
    Absent,
    /// Signature present and `Authentication-Results` says `dkim=pass`
    Valid,
    /// Signature present without a passing `Authentication-Results`
    Invalid,
}

impl fmt::Display for DkimVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DkimVerdict::Absent => "No DKIM-Signature found in the email headers.",
            DkimVerdict::Valid => {
                "DKIM Signature appears valid based on Authentication-Results header"
            }
            DkimVerdict::Invalid => {
                "DKIM Signature is invalid based on Authentication-Results header"
            }
        })
    }
}

pub fn check_dkim(headers: &HeaderSet) -> DkimVerdict {
    let signed = headers
        .relevant
        .iter()
        .any(|line| header_name(line).is_some_and(|n| n.eq_ignore_ascii_case("DKIM-Signature")));
    if !signed {
        return DkimVerdict::Absent;
    }

    if headers.relevant.iter().any(|line| DKIM_PASS.is_match(line)) {
        DkimVerdict::Valid
    } else {
        DkimVerdict::Invalid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpfResult {
    Pass,
    Fail,
    Neutral,
    Softfail,
}

impl SpfResult {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "pass" => Some(SpfResult::Pass),
            "fail" => Some(SpfResult::Fail),
            "neutral" => Some(SpfResult::Neutral),
            "softfail" => Some(SpfResult::Softfail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpfResult::Pass => "pass",
            SpfResult::Fail => "fail",
            SpfResult::Neutral => "neutral",
            SpfResult::Softfail => "softfail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpfVerdict {
    Found { result: SpfResult, client_ip: String },
    Undetermined,
}

impl fmt::Display for SpfVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpfVerdict::Found { result, client_ip } => {
                write!(f, "SPF Result: {}, Client IP: {}", result.as_str(), client_ip)
            }
            SpfVerdict::Undetermined => {
                f.write_str("Could not extract SPF information for validation.")
            }
        }
    }
}

/// First `Received-SPF` line carrying a result token and a `client-ip`
pub fn check_spf(headers: &HeaderSet) -> SpfVerdict {
    headers
        .relevant
        .iter()
        .find_map(|line| {
            let caps = SPF_LINE.captures(line)?;
            let result = SpfResult::parse(caps.get(1)?.as_str())?;
            let client_ip = caps.get(2)?.as_str().trim_end_matches('.').to_string();
            Some(SpfVerdict::Found { result, client_ip })
        })
        .unwrap_or(SpfVerdict::Undetermined)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderReport {
    pub dkim: DkimVerdict,
    pub spf: SpfVerdict,
    pub headers: HeaderSet,
}

impl HeaderReport {
    /// Two blocks, DKIM then SPF; each always has a line
    pub fn render_text(&self) -> String {
        format!("DKIM Result:\n{}\n\nSPF Result:\n{}\n", self.dkim, self.spf)
    }
}

/// Unfold, filter, then run both checks
pub fn analyze_headers(raw: &str) -> HeaderReport {
    let headers = filter(&unfold(raw));
    tracing::debug!(relevant = headers.relevant.len(), "Filtered authentication headers");

    let dkim = check_dkim(&headers);
    let spf = check_spf(&headers);
    tracing::info!(dkim = ?dkim, spf = %spf, "Header analysis complete");

    HeaderReport { dkim, spf, headers }
}
