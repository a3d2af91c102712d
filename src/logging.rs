use env_logger::{Builder, Env};

/// Filter is read from `HANDCTL_LOG` (e.g. `HANDCTL_LOG=debug`), defaulting to `info`.
pub fn init() {
    let env = Env::default()
        .filter_or("HANDCTL_LOG", "info")
        .write_style("HANDCTL_LOG_STYLE");
    Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .init();
}
