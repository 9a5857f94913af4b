use log::LevelFilter;

/// Install the process-wide logger. `RUST_LOG` takes precedence over `level`.
pub fn init(level: LevelFilter) {
   let mut builder = env_logger::Builder::new();
   builder.filter_level(level).format_timestamp_secs();
   if let Ok(spec) = std::env::var("RUST_LOG") {
      builder.parse_filters(&spec);
   }
   // A second init (tests, embedding hosts) keeps the first logger.
   let _ = builder.try_init();
}
