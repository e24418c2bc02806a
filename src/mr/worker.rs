use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use tarpc::context;
use tokio::{
    io::{AsyncWriteExt, BufWriter},
    task::JoinHandle,
    time::sleep,
};

use crate::mr::{
    coordinator::{Assignment, JobServerClient, JobSpec, Phase},
    function::matmul::{distribute, reduce_cell, CellKey, KeyValue, Side, TaggedElement},
    matrix::Matrix,
    output::format_record,
};

/// How long to sleep when the coordinator has nothing to hand out
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often a running task renews its lease
const RENEW_INTERVAL: Duration = Duration::from_secs(1);

/// One worker will only be touched by one worker process, there is no need to synchronize anything
pub struct Worker {
    /// The id the coordinator gave this worker, used to keep temp file names apart
    id: usize,
    /// The job, as described by the coordinator
    spec: JobSpec,
    /// Which phase the worker is currently asking tasks for
    state: Phase,
    /// The map task being worked on, indicating which input matrix to read & distribute
    map_task_id: Option<usize>,
    /// The reduce task being worked on, indicating which partition of cells to reduce
    reduce_task_id: Option<usize>,
}

/// Which reduce task a cell belongs to
pub fn partition_of(key: &CellKey, reduce_n: usize) -> usize {
    let mut s = DefaultHasher::new();
    key.hash(&mut s);
    (s.finish() % reduce_n as u64) as usize
}

/// Write to a sibling temp file first so a crashed or re-run task never leaves a torn file behind
fn temp_path(path: &Path, worker_id: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".tmp-{}", worker_id));
    PathBuf::from(name)
}

impl Worker {
    pub fn new(id: usize, spec: JobSpec) -> Self {
        Self {
            id,
            spec,
            state: Phase::Map,
            map_task_id: None,
            reduce_task_id: None,
        }
    }

    pub fn get_state(&self) -> Phase {
        self.state
    }

    /// Change the current state from `map` to `reduce`
    pub fn change_state(&mut self) {
        assert_eq!(self.state, Phase::Map);
        self.state = Phase::Reduce;
    }

    pub fn set_map_id(&mut self, map_task_id: Option<usize>) {
        self.map_task_id = map_task_id;
    }

    pub fn set_reduce_id(&mut self, reduce_task_id: Option<usize>) {
        self.reduce_task_id = reduce_task_id;
    }

    /// Do the current job in map phase, returns the number of pairs emitted
    pub async fn map(&mut self) -> anyhow::Result<usize> {
        let map_id = self.map_task_id.ok_or_else(|| anyhow!("no map task assigned"))?;
        let side = Side::from_input_index(map_id).ok_or_else(|| anyhow!("map task #{} has no operand", map_id))?;
        let path = self
            .spec
            .inputs
            .get(map_id)
            .ok_or_else(|| anyhow!("map task #{} has no input file", map_id))?;
        log::info!(
            "[Map] Worker is reading input file {} for map task #{}",
            path.display(),
            map_id
        );
        let matrix = Matrix::load(path)?;
        let pairs = distribute(&matrix, side, &self.spec.shape)?;

        let mut files = Vec::with_capacity(self.spec.reduce_n);
        for reduce_id in 0..self.spec.reduce_n {
            let path = self.spec.intermediate_file(map_id, reduce_id);
            let tmp = temp_path(&path, self.id);
            let file = tokio::fs::File::create(&tmp)
                .await
                .with_context(|| format!("cannot create {}", tmp.display()))?;
            files.push((BufWriter::new(file), tmp, path));
        }

        let mut emitted = 0;
        for kv in pairs {
            let index = partition_of(&kv.key, self.spec.reduce_n);
            files[index].0.write_all(kv.to_line().as_bytes()).await?;
            emitted += 1;
        }

        for (mut writer, tmp, path) in files {
            writer.flush().await?;
            tokio::fs::rename(&tmp, &path).await?;
        }
        log::info!(
            "[Map] Worker finish mapping task #{}, #{} pairs written to #{} partitions",
            map_id,
            emitted,
            self.spec.reduce_n
        );
        self.set_map_id(None);
        Ok(emitted)
    }

    async fn read_partition(&self, reduce_id: usize) -> anyhow::Result<Vec<KeyValue>> {
        let mut pairs = Vec::new();
        for map_id in 0..self.spec.map_n() {
            let path = self.spec.intermediate_file(map_id, reduce_id);
            log::debug!(
                "[Reduce] Worker is reading intermediate file {} for reduce task #{}",
                path.display(),
                reduce_id
            );
            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?;
            for line in contents.lines().filter(|l| !l.is_empty()) {
                pairs.push(KeyValue::parse_line(line).with_context(|| path.display().to_string())?);
            }
        }
        Ok(pairs)
    }

    /// Do the current job in reduce phase, returns the cells that could not be computed
    pub async fn reduce(&mut self) -> anyhow::Result<Vec<String>> {
        let reduce_id = self.reduce_task_id.ok_or_else(|| anyhow!("no reduce task assigned"))?;
        let mut pairs = self.read_partition(reduce_id).await?;
        // Sort the pairs based on key, so every bucket is contiguous
        pairs.sort_by_key(|kv| kv.key);

        let path = self.spec.output_file(reduce_id);
        let tmp = temp_path(&path, self.id);
        let mut file = BufWriter::new(tokio::fs::File::create(&tmp).await?);
        let mut failures = Vec::new();
        let mut cells = 0;
        for group in pairs.chunk_by(|lhs, rhs| lhs.key == rhs.key) {
            let key = group[0].key;
            let bucket = group.iter().map(|kv| kv.value).collect::<Vec<TaggedElement>>();
            match reduce_cell(key, &bucket, self.spec.shape.inner) {
                Ok(value) => {
                    file.write_all(format_record(key, value).as_bytes()).await?;
                    file.write_all(b"\n").await?;
                    cells += 1;
                }
                Err(e) => {
                    log::error!("[Reduce] {}", e);
                    failures.push(e.to_string());
                }
            }
        }
        file.flush().await?;
        tokio::fs::rename(&tmp, &path).await?;

        log::info!(
            "[Reduce] Worker finish reducing task #{}, #{} cells written to {}",
            reduce_id,
            cells,
            path.display()
        );
        self.set_reduce_id(None);
        Ok(failures)
    }
}

/// Keep renewing the task lease until the returned handle is aborted
fn keep_lease(client: JobServerClient, phase: Phase, id: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RENEW_INTERVAL);
        loop {
            interval.tick().await;
            if client.renew_lease(context::current(), phase, id).await.is_err() {
                log::warn!("[{:?}] Failed to renew the lease of task #{}", phase, id);
                return;
            }
        }
    })
}

/// Basically, the worker will only do two things in general
/// 1. If there is a not yet finished task, no matter `map` or `reduce`, just do it
/// 2. If the previously assigned task has been finished, ask the coordinator for a new one
///  2.1. If there is no map task left, move on to the reduce phase
///  2.2. If there is no reduce task left, simply exit
pub async fn run(client: JobServerClient) -> anyhow::Result<()> {
    let worker_id = match client.register(context::current()).await? {
        Some(id) => id,
        None => {
            log::warn!("[Preparation] The coordinator already has all the workers it needs, exiting");
            return Ok(());
        }
    };
    log::info!("[Preparation] Get worker id #{} from coordinator", worker_id);
    let spec = client.get_job_spec(context::current()).await?;
    let mut worker = Worker::new(worker_id, spec);

    loop {
        match worker.get_state() {
            Phase::Map => match client.get_map_task(context::current()).await? {
                Assignment::Wait => sleep(POLL_INTERVAL).await,
                Assignment::Exit => {
                    log::info!("[Map] No map tasks left, moving on to the reduce phase");
                    worker.change_state();
                }
                Assignment::Task(id) => {
                    worker.set_map_id(Some(id));
                    let lease = keep_lease(client.clone(), Phase::Map, id);
                    let result = worker.map().await;
                    lease.abort();
                    result?;
                    client.report_map_task_finish(context::current(), id).await?;
                }
            },
            Phase::Reduce => match client.get_reduce_task(context::current()).await? {
                Assignment::Wait => sleep(POLL_INTERVAL).await,
                Assignment::Exit => {
                    log::info!("[Reduce] No reduce tasks left, worker #{} will thus terminate", worker_id);
                    return Ok(());
                }
                Assignment::Task(id) => {
                    worker.set_reduce_id(Some(id));
                    let lease = keep_lease(client.clone(), Phase::Reduce, id);
                    let result = worker.reduce().await;
                    lease.abort();
                    let failures = result?;
                    client.report_reduce_task_finish(context::current(), id, failures).await?;
                }
            },
        }
    }
}
