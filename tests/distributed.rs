//! A coordinator and two workers talking over a local TCP socket.

use std::{net::SocketAddr, path::Path, time::Duration};

use matrix_mr_rs::mr::{
    coordinator::{Coordinator, JobServerClient, JobSpec},
    matrix::{JobShape, Matrix},
    output::{all_close, assemble, read_records},
    worker,
};
use tarpc::{client, tokio_serde::formats::Json};

async fn connect(addr: SocketAddr) -> JobServerClient {
    let transport = tarpc::serde_transport::tcp::connect(addr, Json::default)
        .await
        .unwrap();
    JobServerClient::new(client::Config::default(), transport).spawn()
}

fn write_matrix(dir: &Path, name: &str, rows: &[&[f64]]) -> std::path::PathBuf {
    let contents = rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_workers_compute_the_product() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = write_matrix(dir.path(), "A.txt", &[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[-1.0, 0.5, 2.0]]);
    let b_path = write_matrix(dir.path(), "B.txt", &[&[1.0, 0.0, 2.0, 1.0], &[0.0, 1.0, 1.0, 3.0], &[2.0, 2.0, 0.0, 1.0]]);
    let a = Matrix::load(&a_path).unwrap();
    let b = Matrix::load(&b_path).unwrap();
    let shape = JobShape::new(a.shape(), b.shape()).unwrap();

    let spec = JobSpec {
        inputs: vec![a_path, b_path],
        shape,
        reduce_n: 3,
        work_dir: dir.path().to_path_buf(),
    };
    let coordinator = Coordinator::new(spec.clone(), 2, Duration::from_secs(5));
    let addr = coordinator.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let workers = (0..2)
        .map(|_| tokio::spawn(async move { worker::run(connect(addr).await).await }))
        .collect::<Vec<_>>();
    for handle in workers {
        handle.await.unwrap().unwrap();
    }

    assert!(coordinator.done());
    assert!(coordinator.failures().is_empty());

    let mut records = Vec::new();
    for reduce_id in 0..spec.reduce_n {
        records.extend(read_records(spec.output_file(reduce_id)).unwrap());
    }
    let computed = assemble(&records, shape.output()).unwrap();
    assert!(all_close(&a.multiply(&b).unwrap(), &computed, 1e-9, 1e-9));
}

#[tokio::test]
async fn extra_worker_is_turned_away() {
    let dir = tempfile::tempdir().unwrap();
    let spec = JobSpec {
        inputs: vec![dir.path().join("A.txt"), dir.path().join("B.txt")],
        shape: JobShape {
            a_rows: 1,
            inner: 1,
            b_cols: 1,
        },
        reduce_n: 1,
        work_dir: dir.path().to_path_buf(),
    };
    let coordinator = Coordinator::new(spec, 1, Duration::from_secs(5));
    let addr = coordinator.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let first = connect(addr).await;
    assert_eq!(first.register(tarpc::context::current()).await.unwrap(), Some(0));
    assert!(coordinator.prepare());
    // a second worker exits cleanly without touching any task
    worker::run(connect(addr).await).await.unwrap();
    assert!(!coordinator.done());
}
