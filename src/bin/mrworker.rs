use std::net::SocketAddr;

use clap::Parser;
use matrix_mr_rs::mr::{coordinator::JobServerClient, worker};
use tarpc::{client, tokio_serde::formats::Json};

/// Run map and reduce tasks for a coordinator
#[derive(Parser)]
#[command(name = "mrworker", version)]
struct Args {
    /// Address of the coordinator
    #[arg(long, default_value = "127.0.0.1:1030")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let transport = match tarpc::serde_transport::tcp::connect(args.addr, Json::default).await {
        Ok(t) => t,
        Err(e) => {
            log::error!(
                "[Preparation] Worker failed to connect to the coordinator at {}, please check its status: {}",
                args.addr,
                e
            );
            return Err(e.into());
        }
    };

    let client = JobServerClient::new(client::Config::default(), transport).spawn();
    worker::run(client).await
}
