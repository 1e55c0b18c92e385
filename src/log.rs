//! Logging macros that forward to the `log` crate when the `log` feature is
//! enabled, and only type-check their arguments otherwise.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        {
            ::log::trace!($($arg)*);
        }
        #[cfg(not(feature = "log"))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        {
            ::log::debug!($($arg)*);
        }
        #[cfg(not(feature = "log"))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        {
            ::log::info!($($arg)*);
        }
        #[cfg(not(feature = "log"))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        {
            ::log::warn!($($arg)*);
        }
        #[cfg(not(feature = "log"))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        {
            ::log::error!($($arg)*);
        }
        #[cfg(not(feature = "log"))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}
