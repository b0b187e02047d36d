use std::error::Error;

use clap::Parser;
use linewire::{
    Config, Event, Handler, Peer, Server, banner,
    protocol::HandlerResult,
    runtime,
};
use log::{debug, info};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Name shown in the startup banner
    #[arg(long, default_value = "echo")]
    name: String,
    #[command(flatten)]
    config: Config,
}

/// Sends every message back, terminated by the delimiter.
struct Echo {
    delimiter: Vec<u8>,
}

impl Handler for Echo {
    fn handle(&mut self, event: Event<'_>, peer: &Peer) -> HandlerResult {
        match event {
            Event::Receive(msg) => Ok(Some([msg, &self.delimiter[..]].concat())),
            other => {
                debug!("{} from {peer}", other.kind());
                Ok(None)
            }
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config.validate()?;

    runtime::prepare(cli.config.patch_all);

    let server = Server::bind(config)?;
    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || handle.stop())?;

    info!("{}", banner(&cli.name, &server.local_endpoint()?));

    let delimiter = server.config().delimiter().to_vec();
    server.serve(move |_: &Peer| Echo {
        delimiter: delimiter.clone(),
    })?;
    Ok(())
}
