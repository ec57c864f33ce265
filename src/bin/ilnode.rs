/*! IL2P/AX.25 packet radio node.

Reads the configuration, opens the audio device, and runs until
interrupted. Clients attach to the KISS pseudo-terminal advertised
at startup.
 */
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;

use ilnode::config::Config;
use ilnode::node::Node;

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Configuration file.
    #[arg(short, long, default_value = "ilnode.conf")]
    config: PathBuf,

    /// Verbosity level. Can be repeated for more noise.
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("ilnode")
        .quiet(false)
        .verbosity(opt.verbose as usize + 2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let config = Config::load(&opt.config)?;
    let (source, sink) = ilnode::audio::open(&config.adevice)?;

    let node = Node::new(config);
    let shutdown = node.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Relaxed);
    })?;

    node.run(source, sink)?;
    Ok(())
}
