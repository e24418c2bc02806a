use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::bail;
use clap::Parser;
use matrix_mr_rs::mr::{
    coordinator::{Coordinator, JobSpec},
    matrix::{JobShape, Matrix, Shape},
};
use tokio::time::sleep;

/// Coordinate a distributed multiplication of two matrices
#[derive(Parser)]
#[command(name = "mrcoordinator", version)]
struct Args {
    /// Left operand, one whitespace separated row per line
    a: PathBuf,
    /// Right operand
    b: PathBuf,
    /// Number of reduce tasks, i.e. output partitions `mr-out-*.txt`
    #[arg(short, long, default_value_t = 4)]
    reduce_tasks: usize,
    /// Number of worker processes to wait for before the map phase begins
    #[arg(short, long, default_value_t = 2)]
    workers: usize,
    /// Address of the RPC server
    #[arg(long, default_value = "127.0.0.1:1030")]
    addr: SocketAddr,
    /// Directory for intermediate and output files
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
    /// Expected shape of A, e.g. `1000x50`; checked against the file
    #[arg(long)]
    a_shape: Option<Shape>,
    /// Expected shape of B
    #[arg(long)]
    b_shape: Option<Shape>,
    /// Seconds a task may go without a lease renewal before it is reassigned
    #[arg(long, default_value_t = 5)]
    lease_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.reduce_tasks == 0 || args.workers == 0 {
        bail!("need at least one reduce task and one worker");
    }

    // Malformed input and incompatible shapes abort here, before any task is handed out
    let a = Matrix::load(&args.a)?;
    let b = Matrix::load(&args.b)?;
    let shape = JobShape::resolve(a.shape(), b.shape(), args.a_shape, args.b_shape)?;

    log::info!(
        "[Coordinator Configuration] {} is {} | {} is {} | #{} Reduce Tasks | #{} Worker Processes",
        a.name(),
        a.shape(),
        b.name(),
        b.shape(),
        args.reduce_tasks,
        args.workers
    );

    let spec = JobSpec {
        inputs: vec![args.a, args.b],
        shape,
        reduce_n: args.reduce_tasks,
        work_dir: args.work_dir,
    };
    let coordinator = Coordinator::new(spec, args.workers, Duration::from_secs(args.lease_secs));
    let addr = coordinator.listen(args.addr).await?;

    log::info!(
        "[Preparation] The Coordinator RPC server is serving on {}, please launch #{} worker process(es) to begin MapReduce",
        addr,
        args.workers
    );

    while !coordinator.done() {
        coordinator.check_lease();
        sleep(Duration::from_secs(1)).await;
    }

    let failures = coordinator.failures();
    if !failures.is_empty() {
        for failure in &failures {
            log::error!("{}", failure);
        }
        bail!("#{} result cell(s) could not be computed", failures.len());
    }

    log::info!(
        "The MapReduce process has finished, the results are at {}",
        coordinator.spec().work_dir.join("mr-out-*.txt").display()
    );
    Ok(())
}
