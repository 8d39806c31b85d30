use std::{env, process};

use log::info;

use cifar100::{DatasetConfig, DatasetFactory, dataset::cifar100::NAME};

const USAGE: &str = "Usage: cifar100 download";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        println!("{USAGE}");
        process::exit(1);
    }

    match args[1].as_str() {
        "download" => {
            let config = DatasetConfig::from_env()?;
            let dataset = DatasetFactory::with_builtins().create(NAME, &config)?;
            dataset.prepare().await?;
            info!("{NAME} is ready in {}", config.data_dir().display());
        }
        other => println!("Unknown command {other}"),
    }

    Ok(())
}
