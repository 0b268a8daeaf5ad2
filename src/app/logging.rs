//! Tracing subscriber setup, local-time formatter, dynamic log level reload.

use tracing_subscriber::{reload, EnvFilter};

// Global reload handle so a signal handler can change the level at runtime
pub type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
pub static RELOAD_HANDLE: std::sync::OnceLock<ReloadHandle> = std::sync::OnceLock::new();

pub const VALID_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "critical"];

/// Map a user-facing level to a filter directive. CRITICAL has no tracing
/// equivalent and maps to ERROR.
pub fn level_filter(level: &str) -> Option<&'static str> {
    match level.to_lowercase().as_str() {
        "critical" => Some("error"),
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

/// Pick the log level: flag, then LOG_LEVEL, then config, then info.
pub fn resolve_level(flag: Option<&str>, config: Option<&str>) -> &'static str {
    let env_level = std::env::var("LOG_LEVEL").ok();
    let requested = flag
        .map(str::to_string)
        .or(env_level)
        .or_else(|| config.map(str::to_string))
        .unwrap_or_else(|| "info".to_string());

    match level_filter(&requested) {
        Some(filter) => filter,
        None => {
            eprintln!(
                "Invalid log level '{}'. Using INFO. Valid levels: TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL",
                requested
            );
            "info"
        }
    }
}

// Log timestamps: "YYYY-MM-DD HH:MM:SS" (local time)
pub struct LocalTimeFormatter;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        unsafe {
            let now = libc::time(std::ptr::null_mut());
            let mut tm: libc::tm = std::mem::zeroed();
            libc::localtime_r(&now, &mut tm);

            write!(w, "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                tm.tm_year + 1900,
                tm.tm_mon + 1,
                tm.tm_mday,
                tm.tm_hour,
                tm.tm_min,
                tm.tm_sec)
        }
    }
}

// Event format: "YYYY-MM-DD HH:MM:SS [LEVEL] message"
pub struct CustomEventFormat {
    pub ansi: bool,
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for CustomEventFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use tracing_subscriber::fmt::time::FormatTime;

        LocalTimeFormatter.format_time(&mut writer)?;
        write!(writer, " ")?;

        let level = event.metadata().level();
        if self.ansi {
            let level_color = match *level {
                tracing::Level::TRACE => "\x1b[2m",  // Dim/gray
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::ERROR => "\x1b[31m", // Red
            };
            write!(writer, "{}[{}]\x1b[0m ", level_color, level)?;
        } else {
            // Daemon children write to log files; keep them free of escapes
            write!(writer, "[{}] ", level)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Initialize the tracing subscriber with reload capability.
///
/// Call before starting the async runtime. The timezone is loaded here once,
/// after which `localtime_r` no longer reads `TZ` from the environment.
pub fn init_tracing(filter: &str) {
    use tracing_subscriber::prelude::*;

    extern "C" {
        fn tzset();
    }
    unsafe { tzset() };

    let env_filter = EnvFilter::new(filter);
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);
    let ansi = atty::is(atty::Stream::Stdout);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .with_level(true)
                .with_ansi(ansi)
                .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
                .event_format(CustomEventFormat { ansi }),
        )
        .init();

    let _ = RELOAD_HANDLE.set(reload_handle);
}

/// Swap the active filter. No-op before `init_tracing`.
pub fn reload_level(level: &str) -> anyhow::Result<()> {
    let filter = level_filter(level)
        .ok_or_else(|| anyhow::anyhow!("Invalid log level '{}'", level))?;

    if let Some(handle) = RELOAD_HANDLE.get() {
        handle.reload(EnvFilter::new(filter))?;
        tracing::info!("Log level reloaded: {}", level.to_uppercase());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn critical_maps_to_error() {
        assert_eq!(level_filter("CRITICAL"), Some("error"));
        assert_eq!(level_filter("Warn"), Some("warn"));
        assert_eq!(level_filter("loud"), None);
    }

    #[test]
    fn every_valid_level_has_a_filter() {
        for level in VALID_LEVELS {
            assert!(level_filter(level).is_some(), "{}", level);
        }
    }

    #[test]
    #[serial]
    fn flag_beats_env_beats_config() {
        std::env::set_var("LOG_LEVEL", "warn");
        assert_eq!(resolve_level(Some("debug"), Some("error")), "debug");
        assert_eq!(resolve_level(None, Some("error")), "warn");

        std::env::remove_var("LOG_LEVEL");
        assert_eq!(resolve_level(None, Some("error")), "error");
        assert_eq!(resolve_level(None, None), "info");
        assert_eq!(resolve_level(Some("bogus"), None), "info");
    }

    #[test]
    fn reload_rejects_unknown_level() {
        assert!(reload_level("bogus").is_err());
        assert!(reload_level("debug").is_ok());
    }
}
