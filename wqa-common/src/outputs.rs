//! Parsers for captured command output: terraform apply and `weka status`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::status::ProtectionScheme;

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\b").expect("IPv4 pattern compiles")
});

/// IPv4 address of backend `index`, taken from the most recent apply output
/// line describing `{prefix}-{cluster}-backend-{index}`.
pub fn extract_instance_ip(
    lines: &[String],
    prefix: &str,
    cluster_name: &str,
    index: u32,
) -> Option<String> {
    let instance = format!("{prefix}-{cluster_name}-backend-{index}");
    lines
        .iter()
        .rev()
        .filter_map(|line| line.trim().trim_start_matches('"').strip_prefix(&instance))
        // backend-1 must not match backend-10
        .filter(|rest| !rest.starts_with(|c: char| c.is_ascii_digit()))
        .find_map(|rest| IPV4.captures(rest).map(|c| c[1].to_string()))
}

/// Path of the generated SSH private key from a `SSH-KEY-PATH ...` line.
pub fn extract_private_key_path(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .rev()
        .map(|line| line.trim())
        .find(|line| line.starts_with("SSH-KEY-PATH"))
        .and_then(|line| {
            line.replace('"', "")
                .split_whitespace()
                .last()
                .map(str::to_string)
        })
        .filter(|path| path != "SSH-KEY-PATH" && path != "=")
}

/// The parts of `weka status` the protection checks look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WekaStatusSummary {
    pub stripe_data_drives: Option<u32>,
    pub stripe_protection_drives: Option<u32>,
    pub hot_spare: Option<u32>,
}

impl WekaStatusSummary {
    pub fn protection(&self) -> Option<ProtectionScheme> {
        Some(ProtectionScheme::new(
            self.stripe_data_drives?,
            self.stripe_protection_drives?,
            self.hot_spare?,
        ))
    }
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Pick `protection: D+P` and `hot spare: N ...` out of `weka status`.
pub fn parse_weka_status(lines: &[String]) -> WekaStatusSummary {
    let mut summary = WekaStatusSummary::default();
    for line in lines.iter().map(|l| l.trim()) {
        if let Some(rest) = line.strip_prefix("protection:") {
            if let Some((data, protection)) = rest.trim().split_once('+') {
                summary.stripe_data_drives = leading_number(data);
                summary.stripe_protection_drives = leading_number(protection);
            }
        } else if let Some(rest) = line.strip_prefix("hot spare:") {
            summary.hot_spare = leading_number(rest);
        }
    }
    summary
}
