use clap::Parser;

use pixiv_relay::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cli::run(Cli::parse()).await
}
