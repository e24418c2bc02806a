use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use matrix_mr_rs::mr::matrix::Matrix;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Generate random input matrices A and B and their product C
#[derive(Parser)]
#[command(name = "mrgen", version)]
struct Args {
    #[arg(long, default_value_t = 1000)]
    a_rows: usize,
    #[arg(long, default_value_t = 50)]
    inner: usize,
    #[arg(long, default_value_t = 2000)]
    b_cols: usize,
    /// Where `A.txt`, `B.txt` and `C.txt` are written
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
    /// Seed for reproducible matrices
    #[arg(long)]
    seed: Option<u64>,
}

fn random_matrix(name: &str, rows: usize, cols: usize, rng: &mut impl Rng) -> anyhow::Result<Matrix> {
    let data = (0..rows)
        .map(|_| (0..cols).map(|_| rng.gen::<f64>()).collect())
        .collect();
    Ok(Matrix::from_rows(name, data)?)
}

fn save(matrix: &Matrix, path: &Path) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for i in 0..matrix.rows() {
        let row = matrix
            .row(i)
            .iter()
            .map(|v| format!("{:.18e}", v))
            .collect::<Vec<_>>();
        writeln!(out, "{}", row.join(" "))?;
    }
    out.flush()?;
    log::info!("Wrote {} ({}) to {}", matrix.name(), matrix.shape(), path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let a = random_matrix("A", args.a_rows, args.inner, &mut rng)?;
    let b = random_matrix("B", args.inner, args.b_cols, &mut rng)?;
    let c = a.multiply(&b)?;

    fs::create_dir_all(&args.out_dir)?;
    save(&a, &args.out_dir.join("A.txt"))?;
    save(&b, &args.out_dir.join("B.txt"))?;
    save(&c, &args.out_dir.join("C.txt"))?;
    Ok(())
}
