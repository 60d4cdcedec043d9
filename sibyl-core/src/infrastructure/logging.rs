//! Console logging via `log` + `log4rs`.
//!
//! Filter grammar: a bare level sets the level for the workspace crates
//! (`"debug"`), `crate=level` pairs opt specific third-party crates in
//! (`"info,libp2p_gossipsub=debug"`), and `root=level` opens the floodgates
//! for everything. Third-party output is off by default.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

const CONSOLE_APPENDER: &str = "stderr";
const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{h({l}):5.5}] {m}{n}";

const WORKSPACE_CRATES: [&str; 4] = ["sibyl_core", "sibyl_service", "sibyl_coordinator", "sibyl_signer"];

struct ParsedFilters {
    app_level: LevelFilter,
    root_level: LevelFilter,
    modules: Vec<(String, LevelFilter)>,
}

fn parse_filters(filters: &str) -> ParsedFilters {
    let mut parsed = ParsedFilters { app_level: LevelFilter::Info, root_level: LevelFilter::Off, modules: Vec::new() };
    for part in filters.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            None => {
                if let Ok(level) = part.parse() {
                    parsed.app_level = level;
                }
            }
            Some((module, level)) => {
                let (module, level) = (module.trim(), level.trim());
                let Ok(level) = level.parse() else { continue };
                if module == "root" {
                    parsed.root_level = level;
                } else {
                    parsed.modules.push((module.to_string(), level));
                }
            }
        }
    }
    parsed
}

/// Global logger setup; repeated calls are ignored.
pub fn init_logger(filters: &str) {
    let parsed = parse_filters(filters);

    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut builder = Config::builder().appender(Appender::builder().build(CONSOLE_APPENDER, Box::new(console)));

    for name in WORKSPACE_CRATES {
        if !parsed.modules.iter().any(|(module, _)| module == name) {
            builder = builder
                .logger(Logger::builder().appender(CONSOLE_APPENDER).additive(false).build(name, parsed.app_level));
        }
    }
    for (module, level) in &parsed.modules {
        builder = builder.logger(Logger::builder().appender(CONSOLE_APPENDER).additive(false).build(module, *level));
    }

    if let Ok(config) = builder.build(Root::builder().appender(CONSOLE_APPENDER).build(parsed.root_level)) {
        let _ = log4rs::init_config(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_sets_the_app_level() {
        let parsed = parse_filters("debug");
        assert_eq!(parsed.app_level, LevelFilter::Debug);
        assert_eq!(parsed.root_level, LevelFilter::Off);
        assert!(parsed.modules.is_empty());
    }

    #[test]
    fn module_pairs_and_root_override_are_parsed() {
        let parsed = parse_filters("info,libp2p_gossipsub=debug,root=warn");
        assert_eq!(parsed.app_level, LevelFilter::Info);
        assert_eq!(parsed.root_level, LevelFilter::Warn);
        assert_eq!(parsed.modules, vec![("libp2p_gossipsub".to_string(), LevelFilter::Debug)]);
    }

    #[test]
    fn garbage_tokens_are_ignored() {
        let parsed = parse_filters("nonsense,=x,foo=,bar=not_a_level");
        assert_eq!(parsed.app_level, LevelFilter::Info);
        assert!(parsed.modules.is_empty());
    }
}
