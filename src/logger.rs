/// Initializes the global logger.
///
/// Verbose runs log at debug level; otherwise only warnings (such as YAML
/// floats converted to strings) are shown.
pub fn init_logger(verbose: bool) {
    env_logger::Builder::new()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();
}
