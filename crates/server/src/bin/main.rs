use meridian_server::MeridianServer;

#[derive(clap::Parser)]
struct Args {
    #[arg(long, default_value = "config/meridian.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    use meridian_common::config::AppConfig;
    let app_config = AppConfig::from_file(&args.config).unwrap_or_default();

    println!("--------------------------------------------------");
    println!("   Meridian Execution Server");
    println!("   Server Name: {}", app_config.server.name);
    println!("   Admin Addr:  {}", app_config.server.admin_addr);
    println!("--------------------------------------------------");

    // Vendor capabilities and credential resolution are registered by the
    // embedding deployment; the bare binary serves the admin surface only.
    MeridianServer::new()
        .with_app_config(&args.config)
        .run()
        .await
}
