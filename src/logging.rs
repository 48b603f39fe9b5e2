//! Logging setup
//!
//! The library only emits through the `log` facade. Binaries call [`init`]
//! once at startup to install `env_logger`; `RUST_LOG` always wins over the
//! default filter chosen here.

use env_logger::Env;

/// Default filter when `RUST_LOG` is unset
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Install `env_logger` as the global logger.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init(debug: bool) {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter(debug)))
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(true), "debug");
        assert_eq!(default_filter(false), "info");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(false);
        init(true);
        log::info!("logger installed");
    }
}
