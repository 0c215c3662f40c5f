use sniffproxy::config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_args();
    let server_config = match config.into_server_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = sniffproxy::run(server_config).await {
        tracing::error!(error = %e, "proxy server failed");
        std::process::exit(1);
    }
}
