mod pages;

use anyhow::{Result, bail};
use tracing::{error, info};

use mart_chain::Storefront;
use mart_core::MartConfig;
use mart_core::logging;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: decentralmart [home|products|register-seller <name> <description>|dashboard|connect]";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Home,
    Products,
    RegisterSeller { name: String, description: String },
    Dashboard,
    Connect,
}

fn parse_command(args: &[String]) -> Result<Command> {
    let command = match args.first().map(String::as_str) {
        None | Some("home") => Command::Home,
        Some("products") => Command::Products,
        Some("register-seller") => match (args.get(1), args.get(2)) {
            (Some(name), Some(description)) => Command::RegisterSeller {
                name: name.clone(),
                description: description.clone(),
            },
            _ => bail!("register-seller needs <name> and <description>\n{USAGE}"),
        },
        Some("dashboard") => Command::Dashboard,
        Some("connect") => Command::Connect,
        Some(other) => bail!("unknown command `{other}`\n{USAGE}"),
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help")) {
        println!("{USAGE}");
        return Ok(());
    }
    let command = parse_command(&args)?;

    let config = MartConfig::load()?.apply_env_overrides();
    let _log_guard = logging::init_logging(&config.log_level)?;
    info!("Starting DecentralMart v{VERSION}");

    let shop = Storefront::from_config(&config).inspect_err(|e| error!("Storefront setup failed: {e:#}"))?;
    let tasks = shop.start();

    let page = match command {
        Command::Home => pages::home(&shop).await,
        Command::Products => pages::products(&shop).await,
        Command::RegisterSeller { name, description } => {
            pages::register_seller(&shop, &name, &description).await
        }
        Command::Dashboard => pages::dashboard(&shop).await,
        Command::Connect => pages::connect(&shop).await,
    }?;
    print!("{page}");

    shop.disconnect();
    for task in tasks {
        task.abort();
    }
    Ok(())
}
