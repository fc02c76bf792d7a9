use businalyst::app;
use businalyst::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    println!(
        "Starting dashboard server on http://{} (backend {})",
        config.bind_addr, config.api_url
    );
    app::run(config).await?;
    Ok(())
}
