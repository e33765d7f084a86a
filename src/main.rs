use anyhow::Result;
use clap::Parser;
use dnsmap::cli::{self, Cli};
use dnsmap::runner::Runner;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("dnsmap: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let apex = cli::normalize_apex(&cli.domain)?;
    Runner::new(apex).run().await
}
