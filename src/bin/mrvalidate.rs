use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use matrix_mr_rs::mr::{
    matrix::Matrix,
    output::{all_close, assemble, read_records},
};

/// Compare computed result records against the expected product
#[derive(Parser)]
#[command(name = "mrvalidate", version)]
struct Args {
    /// Expected matrix, e.g. the `C.txt` written by mrgen
    expected: PathBuf,
    /// Result record files, e.g. `mr-out-*.txt`
    #[arg(required = true)]
    computed: Vec<PathBuf>,
    #[arg(long, default_value_t = 1e-9)]
    atol: f64,
    #[arg(long, default_value_t = 1e-9)]
    rtol: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let expected = Matrix::load(&args.expected)?;
    println!("Comparing matrices of shape {}", expected.shape());

    let mut records = Vec::new();
    for path in &args.computed {
        records.extend(read_records(path)?);
    }
    let computed = assemble(&records, expected.shape())?;

    let close = all_close(&expected, &computed, args.atol, args.rtol);
    println!("{}", close);
    if !close {
        bail!("computed matrix differs from {}", args.expected.display());
    }
    Ok(())
}
