//! Process-wide tracing setup for the scorer binaries.

use std::{panic, path::PathBuf, sync::OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logging knobs resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub app_name: &'static str,
    /// Directive used when `RUST_LOG` is unset (`DR_LOG_LEVEL`, default `info`).
    pub default_directive: String,
    /// Daily-rotated `<dir>/<app_name>.log` instead of stdout (`DR_LOG_DIR`).
    pub log_dir: Option<PathBuf>,
    /// Also run the default panic hook, which prints the backtrace
    /// (`DR_LOG_INCLUDE_BACKTRACE`).
    pub include_backtrace: bool,
}

impl LogSettings {
    pub fn from_env(app_name: &'static str) -> Self {
        Self {
            app_name,
            default_directive: std::env::var("DR_LOG_LEVEL")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
            log_dir: std::env::var_os("DR_LOG_DIR")
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
            include_backtrace: truthy(std::env::var("DR_LOG_INCLUDE_BACKTRACE").ok().as_deref()),
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }

    fn file_writer(&self) -> Option<BoxMakeWriter> {
        let dir = self.log_dir.as_ref()?;
        if let Err(err) = std::fs::create_dir_all(dir) {
            eprintln!(
                "{}: cannot create log dir {}: {err}; logging to stdout",
                self.app_name,
                dir.display()
            );
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, format!("{}.log", self.app_name));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // a second init keeps the first guard; the extra writer is dropped unused
        let _ = FILE_GUARD.set(guard);
        Some(BoxMakeWriter::new(writer))
    }
}

fn truthy(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some(v) if v == "1" || v.eq_ignore_ascii_case("true"))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Sends panics to the log as a single `error` event. Only the first call
/// per process installs the hook.
pub fn install_tracing_panic_hook(app_name: &'static str) {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| {
        let include_backtrace = LogSettings::from_env(app_name).include_backtrace;
        let previous = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .unwrap_or_else(|| "unknown".to_string());
            let thread = std::thread::current();
            tracing::error!(
                app = app_name,
                thread = thread.name().unwrap_or("unnamed"),
                %location,
                panic_message = panic_message(info.payload()),
                "scorer panicked"
            );

            if include_backtrace {
                previous(info);
            }
        }));
    });
}

/// Installs the global fmt subscriber described by `LogSettings::from_env`.
/// Later calls are no-ops.
pub fn init_tracing_subscriber(app_name: &'static str) {
    let settings = LogSettings::from_env(app_name);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(settings.filter())
        .with_target(false);

    let _ = match settings.file_writer() {
        Some(writer) => builder.with_ansi(false).with_writer(writer).try_init(),
        None => builder.try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 3] = ["DR_LOG_LEVEL", "DR_LOG_DIR", "DR_LOG_INCLUDE_BACKTRACE"];

    fn with_env(vars: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        for key in KEYS {
            unsafe { std::env::remove_var(key) };
        }
        for (key, value) in vars {
            unsafe { std::env::set_var(key, value) };
        }
        f();
        for key in KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_log_info_to_stdout() {
        with_env(&[], || {
            let settings = LogSettings::from_env("dr-test");
            assert_eq!(settings.default_directive, "info");
            assert_eq!(settings.log_dir, None);
            assert!(!settings.include_backtrace);
        });
    }

    #[test]
    fn reads_overrides() {
        with_env(
            &[
                ("DR_LOG_LEVEL", "debug,tokio_postgres=warn"),
                ("DR_LOG_DIR", "/var/log/devrank"),
                ("DR_LOG_INCLUDE_BACKTRACE", "TRUE"),
            ],
            || {
                let settings = LogSettings::from_env("dr-test");
                assert_eq!(settings.default_directive, "debug,tokio_postgres=warn");
                assert_eq!(settings.log_dir, Some(PathBuf::from("/var/log/devrank")));
                assert!(settings.include_backtrace);
            },
        );
    }

    #[test]
    fn only_one_and_true_are_truthy() {
        let cases = [
            ("1", true),
            (" true ", true),
            ("True", true),
            ("0", false),
            ("yes", false),
        ];
        for (value, expected) in cases {
            assert_eq!(truthy(Some(value)), expected, "value {value:?}");
        }
        assert!(!truthy(None));
    }

    #[test]
    fn panic_message_reads_both_payload_kinds() {
        let borrowed: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(borrowed.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn subscriber_init_is_idempotent() {
        with_env(&[], || {
            init_tracing_subscriber("dr-common-test");
            init_tracing_subscriber("dr-common-test");
        });
    }
}
