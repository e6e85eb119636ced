use std::{error::Error, time::Duration};

use clap::Parser;
use farcall::Request;
use serde_json::Value;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Function name to call
    name: String,
    /// Arguments as a JSON value
    #[arg(default_value = "null")]
    args: String,
    /// Listener host
    #[arg(long, default_value = "127.0.0.1")]
    address: String,
    /// Listener port
    #[arg(long, default_value_t = 4567)]
    port: u16,
    /// Seconds to wait for the reply
    #[arg(long, default_value_t = 1.0)]
    timeout: f32,
    /// Fire and forget: return without waiting for the reply
    #[arg(long)]
    no_wait: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let args: Value = serde_json::from_str(&cli.args)?;

    let mut request = Request::new();
    request.send(
        &cli.address,
        cli.port,
        &cli.name,
        &args,
        !cli.no_wait,
        Duration::from_secs_f32(cli.timeout),
    )?;

    if !cli.no_wait {
        println!("{}", request.result());
    }
    Ok(())
}
