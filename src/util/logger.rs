use log::SetLoggerError;

/// Attempt to init an env_logger for the region allocator.
/// Does nothing if the "builtin_env_logger" feature is disabled.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice() {
        // The first call may fail if another test already installed a logger.
        let _ = super::try_init();
        if cfg!(feature = "builtin_env_logger") {
            assert!(super::try_init().is_err());
        } else {
            assert!(super::try_init().is_ok());
        }
    }
}
