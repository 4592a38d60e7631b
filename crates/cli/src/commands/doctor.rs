//! Doctor command - validate configuration and show status

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::args::DoctorArgs;
use crate::config::{AppConfig, CacheBackend};

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    bluesky: CheckResult,
    cache: CheckResult,
    twitter: CheckResult,
    mastodon: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        bluesky: CheckResult::error("Not checked"),
        cache: CheckResult::error("Not checked"),
        twitter: CheckResult::error("Not checked"),
        mastodon: CheckResult::error("Not checked"),
        overall: "error".to_string(),
    };

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {:#}", e));
            None
        }
    };

    if let Some(ref config) = config {
        report.bluesky = check_bluesky(config);
        report.cache = check_cache(config);
        report.twitter = check_twitter(config);
        report.mastodon = check_mastodon(config);

        if !config.twitter.enabled && !config.mastodon.enabled {
            report.config = CheckResult::warn(
                "Configuration loaded, but no destination is enabled",
            );
        }
    }

    let checks = [
        &report.config,
        &report.bluesky,
        &report.cache,
        &report.twitter,
        &report.mastodon,
    ];

    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

fn secret_state(env_var: &str) -> &'static str {
    match std::env::var(env_var) {
        Ok(val) if !val.trim().is_empty() => "set",
        _ => "not set",
    }
}

fn check_bluesky(config: &AppConfig) -> CheckResult {
    let section = &config.bluesky;

    if section.handle.trim().is_empty() {
        return CheckResult::error("bluesky.handle is not configured");
    }
    if section.app_password_env.is_empty() {
        return CheckResult::error("No app password env var configured");
    }

    let state = secret_state(&section.app_password_env);
    let message = format!(
        "Handle: {}, Service: {}, App password: {} ({})",
        section.handle, section.service_url, section.app_password_env, state
    );
    if state == "set" {
        CheckResult::ok(message)
    } else {
        CheckResult::error(message)
    }
}

fn check_cache(config: &AppConfig) -> CheckResult {
    let general = &config.general;
    let details = serde_json::json!({
        "backend": general.cache_backend,
        "path": general.cache_path,
        "post_time_limit_hours": general.post_time_limit_hours,
        "cache_retention_days": general.cache_retention_days,
    });

    if general.cache_backend == CacheBackend::Memory {
        return CheckResult::warn("In-memory cache: every run starts empty").with_details(details);
    }

    if general.cache_retention_days.saturating_mul(24) < general.post_time_limit_hours {
        return CheckResult::warn(
            "cache_retention_days is shorter than post_time_limit_hours; recent posts may be mirrored twice",
        )
        .with_details(details);
    }

    let state = if general.cache_path.exists() {
        "exists"
    } else {
        "will be created"
    };
    CheckResult::ok(format!(
        "Backend: {:?}, Path: {} ({})",
        general.cache_backend,
        general.cache_path.display(),
        state
    ))
    .with_details(details)
}

fn check_twitter(config: &AppConfig) -> CheckResult {
    let section = &config.twitter;
    if !section.enabled {
        return CheckResult::ok("Twitter disabled");
    }

    if section.user_token_env.is_empty() {
        return CheckResult::error("No user token env var configured");
    }

    match secret_state(&section.user_token_env) {
        "set" => CheckResult::ok(format!(
            "User token: {} (set), Max chars: {}",
            section.user_token_env, section.max_chars
        )),
        state => CheckResult::warn(format!(
            "User token: {} ({}), Max chars: {}",
            section.user_token_env, state, section.max_chars
        )),
    }
}

fn check_mastodon(config: &AppConfig) -> CheckResult {
    let section = &config.mastodon;
    if !section.enabled {
        return CheckResult::ok("Mastodon disabled");
    }

    if section.instance_url.trim().is_empty() {
        return CheckResult::error("mastodon.instance_url is not configured");
    }
    if section.access_token_env.is_empty() {
        return CheckResult::error("No access token env var configured");
    }

    let account = if section.handle.is_empty() {
        section.instance_url.clone()
    } else {
        format!(
            "{}/@{}",
            section.instance_url.trim_end_matches('/'),
            section.handle.trim_start_matches('@')
        )
    };

    match secret_state(&section.access_token_env) {
        "set" => CheckResult::ok(format!(
            "Account: {}, Access token: {} (set)",
            account, section.access_token_env
        )),
        state => CheckResult::warn(format!(
            "Account: {}, Access token: {} ({})",
            account, section.access_token_env, state
        )),
    }
}

fn print_report(report: &DoctorReport) {
    println!("skymirror Doctor Report");
    println!("=======================");
    println!();

    print_check("Config", &report.config);
    print_check("Bluesky", &report.bluesky);
    print_check("Cache", &report.cache);
    print_check("Twitter", &report.twitter);
    print_check("Mastodon", &report.mastodon);

    println!();
    let symbol = match report.overall.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} Overall: {}", symbol, report.overall.to_uppercase());

    if report.overall != "error" {
        println!();
        println!("Ready to run! Try: skymirror run --dry-run");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    let symbol = match result.status.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} {}: {}", symbol, name, result.message);
}
