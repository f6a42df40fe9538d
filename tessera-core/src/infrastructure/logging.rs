//! Logging bootstrap using `log` + `log4rs`.
//!
//! Console output goes to stderr; when a log directory is configured a
//! size-rolled file appender is added. Filtering is whitelist-based: the
//! tessera crates log at the requested level, everything else is off
//! unless opted in with `<crate>=<level>` (or `root=<level>` for all).

use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy},
            RollingFileAppender,
        },
    },
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use std::path::PathBuf;

const CONSOLE_APPENDER: &str = "stderr";
const LOG_FILE_APPENDER: &str = "log_file";
const LOG_FILE_NAME: &str = "tessera.log";
const LOG_FILE_MAX_SIZE: u64 = 32 * 1024 * 1024;
const LOG_FILE_MAX_ROLLS: u32 = 8;
const LOG_LINE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{h({l})}] {t}: {m}{n}";

const WHITELISTED_CRATES: &[&str] = &["tessera_core", "tessera_service", "tesserad", "tessera_keygen"];

/// Initialize the global logger. Repeated calls are ignored.
pub fn init_logger(log_dir: Option<&str>, filters: &str) {
    let app_level = parse_app_level(filters);
    let root_level = parse_root_override(filters).unwrap_or(LevelFilter::Off);
    let module_levels = parse_module_levels(filters);

    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_LINE_PATTERN)))
        .build();

    let mut config_builder = Config::builder().appender(Appender::builder().build(CONSOLE_APPENDER, Box::new(console)));
    let mut root_appenders: Vec<&str> = vec![CONSOLE_APPENDER];

    if let Some(dir) = log_dir.filter(|s| !s.trim().is_empty()) {
        let dir = dir.trim();
        let log_path = PathBuf::from(dir).join(LOG_FILE_NAME);
        let archive_pattern = PathBuf::from(dir).join(format!("{LOG_FILE_NAME}.{{}}.gz"));

        let roller = FixedWindowRoller::builder()
            .base(1)
            .build(archive_pattern.to_str().unwrap_or("tessera.log.{}.gz"), LOG_FILE_MAX_ROLLS)
            .expect("static roller pattern");
        let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(LOG_FILE_MAX_SIZE)), Box::new(roller));

        if let Ok(file_appender) =
            RollingFileAppender::builder().encoder(Box::new(PatternEncoder::new(LOG_LINE_PATTERN))).build(log_path, Box::new(policy))
        {
            config_builder = config_builder.appender(Appender::builder().build(LOG_FILE_APPENDER, Box::new(file_appender)));
            root_appenders.push(LOG_FILE_APPENDER);
        }
    }

    let appender_names: Vec<String> = root_appenders.iter().map(|name| (*name).to_string()).collect();

    for crate_name in WHITELISTED_CRATES {
        if !module_levels.iter().any(|(m, _)| m == *crate_name) {
            config_builder = config_builder
                .logger(Logger::builder().appenders(appender_names.clone()).additive(false).build(*crate_name, app_level));
        }
    }

    for (module, level) in &module_levels {
        config_builder =
            config_builder.logger(Logger::builder().appenders(appender_names.clone()).additive(false).build(module, *level));
    }

    if let Ok(config) = config_builder.build(Root::builder().appenders(root_appenders).build(root_level)) {
        let _ = log4rs::init_config(config);
    }
}

fn parse_app_level(filters: &str) -> LevelFilter {
    for part in filters.split(',') {
        let part = part.trim();
        if part.is_empty() || part.contains('=') {
            continue;
        }
        if let Ok(level) = part.parse() {
            return level;
        }
    }
    LevelFilter::Info
}

fn parse_root_override(filters: &str) -> Option<LevelFilter> {
    filters.split(',').find_map(|part| {
        let (module, level_str) = part.trim().split_once('=')?;
        if module.trim() != "root" {
            return None;
        }
        level_str.trim().parse().ok()
    })
}

fn parse_module_levels(filters: &str) -> Vec<(String, LevelFilter)> {
    let mut result = Vec::new();
    for part in filters.split(',') {
        if let Some((module, level_str)) = part.trim().split_once('=') {
            let module = module.trim();
            if module.is_empty() || module == "root" {
                continue;
            }
            if let Ok(level) = level_str.trim().parse() {
                result.push((module.to_string(), level));
            }
        }
    }
    result
}
