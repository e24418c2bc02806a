use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use anyhow::bail;
use clap::Parser;
use matrix_mr_rs::mr::{
    local,
    matrix::{JobShape, Matrix, Shape},
    output::format_record,
};

/// Multiply two matrices with the MapReduce pipeline in this process
#[derive(Parser)]
#[command(name = "mrsequential", version)]
struct Args {
    /// Left operand, one whitespace separated row per line
    a: PathBuf,
    /// Right operand
    b: PathBuf,
    /// Write records here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Expected shape of A, e.g. `1000x50`; checked against the file
    #[arg(long)]
    a_shape: Option<Shape>,
    /// Expected shape of B
    #[arg(long)]
    b_shape: Option<Shape>,
    /// Stop at the first cell that cannot be computed
    #[arg(long)]
    fail_fast: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let a = Matrix::load(&args.a)?;
    let b = Matrix::load(&args.b)?;
    let shape = JobShape::resolve(a.shape(), b.shape(), args.a_shape, args.b_shape)?;
    let outcome = local::multiply(&a, &b, &shape, args.fail_fast)?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for &(key, value) in &outcome.cells {
        writeln!(out, "{}", format_record(key, value))?;
    }
    out.flush()?;

    if !outcome.is_complete() {
        bail!("#{} result cell(s) could not be computed", outcome.failures.len());
    }
    Ok(())
}
