use anyhow::Context;
use conf_migrate::core::config::MigrationConfig;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &MigrationConfig) {
    let default = if config.dblog { "conf_migrate=debug" } else { "conf_migrate=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    conf_migrate::run(init_tracing).context("migration failed")
}
