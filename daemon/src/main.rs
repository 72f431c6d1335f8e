use mcsv_daemon::app::run_app;
use mcsv_daemon::config::AppConfig;

fn init_logger() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let config = AppConfig::load()?;
    run_app(config).await
}
