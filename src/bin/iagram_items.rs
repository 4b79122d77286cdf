// iagram-items: standalone item store for archived prompts
// Build with: cargo build --features api --bin iagram-items

use clap::{Arg, Command};
use iagram::api::server;
use iagram::persistence::settings::AppSettings;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let matches = Command::new("iagram-items")
        .about("iaGram item store: accepts POST /items/ and echoes the stored item")
        .arg(Arg::new("host").long("host").value_name("ADDR").help("Bind address (default from settings, 127.0.0.1)"))
        .arg(Arg::new("port").long("port").value_name("PORT").value_parser(clap::value_parser!(u16)).help("Bind port (default from settings, 8000)"))
        .arg(Arg::new("log_dir").long("log-dir").value_name("DIR").help("Directory for traffic logs"))
        .get_matches();

    let mut settings = AppSettings::load().unwrap_or_default();
    if let Some(host) = matches.get_one::<String>("host") {
        settings.api_bind_addr = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        settings.api_port = *port;
    }
    if let Some(dir) = matches.get_one::<String>("log_dir") {
        settings.api_log_override = Some(dir.into());
    }
    server::serve(&settings).await
}
