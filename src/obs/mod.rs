pub mod logger;

/// Logs a formatted message at the `Debug` level.
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.debug(format_args!($($arg)*))
    };
}

/// Logs a formatted message at the `Info` level.
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.info(format_args!($($arg)*))
    };
}

/// Logs a formatted message at the `Warn` level.
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.warn(format_args!($($arg)*))
    };
}

/// Logs a formatted message at the `Error` level.
#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.error(format_args!($($arg)*))
    };
}

/// Emits a structured trace event when tracing is enabled.
#[macro_export]
macro_rules! event {
    ($logger:expr, $($arg:tt)*) => {
        if $logger.is_tracing_enabled() {
            $logger.event(format_args!($($arg)*))
        }
    };
}
