use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use farcall::Listener;
use log::{info, warn};
use serde_json::json;

#[derive(Debug, Parser)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 4567)]
    port: u16,
    /// Maximum worker threads; 0 services everything on this thread
    #[arg(long, default_value_t = 4)]
    workers: u32,
    /// Seconds a connection may take to deliver its request
    #[arg(long, default_value_t = 1.0)]
    timeout: f32,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut listener = Listener::new();

    listener.register("echo", |args| args.clone())?;
    listener.register("add", |args| {
        let a = args["a"].as_f64().unwrap_or(0.0);
        let b = args["b"].as_f64().unwrap_or(0.0);
        json!(a + b)
    })?;

    listener.start(
        cli.port,
        cli.workers,
        8,
        Duration::from_secs_f32(cli.timeout),
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    info!("press Ctrl-C to stop");
    while running.load(Ordering::SeqCst) {
        if cli.workers == 0 {
            if let Err(err) = listener.update(Duration::from_millis(250)) {
                warn!("update failed: {err}");
                break;
            }
        } else {
            thread::sleep(Duration::from_millis(250));
        }
    }

    listener.stop();
    Ok(())
}
