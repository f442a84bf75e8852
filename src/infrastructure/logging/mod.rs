//! Logging init using `log` + `log4rs`.
//!
//! Console on stderr, optional rolling file appender, whitelist
//! filtering: external crates stay silent unless opted in via
//! `<crate>=<level>` in the filter expression.

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
const FILE_APPENDER: &str = "log_file";
const LOG_FILE_NAME: &str = "coinjoin.log";
const LOG_LINE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{h({l})}] {t}: {m}{n}";
const LOG_FILE_MAX_SIZE: u64 = 10 * 1024 * 1024;
const LOG_FILE_MAX_ROLLS: u32 = 4;

/// Initialize the global logger. Repeated calls are ignored.
///
/// `filters` examples: `"info"`, `"debug,figment=warn"`.
pub fn init_logger(log_dir: Option<&str>, filters: &str) {
    let app_level = parse_app_level(filters);
    let module_levels = parse_module_levels(filters);

    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_LINE_PATTERN)))
        .build();

    let mut builder = Config::builder().appender(Appender::builder().build(CONSOLE_APPENDER, Box::new(console)));
    let mut appenders: Vec<&str> = vec![CONSOLE_APPENDER];

    if let Some(dir) = log_dir.filter(|s| !s.trim().is_empty()) {
        let dir = dir.trim();
        let log_path = PathBuf::from(dir).join(LOG_FILE_NAME);
        let archive = PathBuf::from(dir).join(format!("{LOG_FILE_NAME}.{{}}.gz"));

        let roller = FixedWindowRoller::builder()
            .base(1)
            .build(archive.to_str().unwrap_or("coinjoin.log.{}.gz"), LOG_FILE_MAX_ROLLS);
        if let Ok(roller) = roller {
            let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(LOG_FILE_MAX_SIZE)), Box::new(roller));
            if let Ok(file_appender) = RollingFileAppender::builder()
                .encoder(Box::new(PatternEncoder::new(LOG_LINE_PATTERN)))
                .build(log_path, Box::new(policy))
            {
                builder = builder.appender(Appender::builder().build(FILE_APPENDER, Box::new(file_appender)));
                appenders.push(FILE_APPENDER);
            }
        }
    }

    let appender_names: Vec<String> = appenders.iter().map(|name| (*name).to_string()).collect();

    // our crate logs at the requested level; everything else is opt-in
    builder = builder.logger(
        Logger::builder().appenders(appender_names.clone()).additive(false).build("coinjoin_core", app_level),
    );
    for (module, level) in &module_levels {
        builder =
            builder.logger(Logger::builder().appenders(appender_names.clone()).additive(false).build(module, *level));
    }

    if let Ok(config) = builder.build(Root::builder().appenders(appenders).build(LevelFilter::Off)) {
        let _ = log4rs::init_config(config);
    }
}

fn parse_app_level(filters: &str) -> LevelFilter {
    for part in filters.split(',') {
        let part = part.trim();
        if !part.is_empty() && !part.contains('=') {
            if let Ok(level) = part.parse() {
                return level;
            }
        }
    }
    LevelFilter::Info
}

fn parse_module_levels(filters: &str) -> Vec<(String, LevelFilter)> {
    let mut result = Vec::new();
    for part in filters.split(',') {
        if let Some((module, level)) = part.trim().split_once('=') {
            let (module, level) = (module.trim(), level.trim());
            if module.is_empty() || level.is_empty() {
                continue;
            }
            if let Ok(level) = level.parse() {
                result.push((module.to_string(), level));
            }
        }
    }
    result
}
