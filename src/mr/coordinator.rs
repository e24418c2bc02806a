use std::{
    collections::BTreeMap,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::{
    future::{ready, Ready},
    StreamExt,
};
use serde::{Deserialize, Serialize};
use tarpc::{context, server::incoming::Incoming, tokio_serde::formats::Json};
use tokio::time::Instant;

use crate::mr::matrix::JobShape;

/// Everything a worker needs to know about the job, handed out read-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Input matrix files, `A` first and `B` second; map task `m` reads `inputs[m]`
    pub inputs: Vec<PathBuf>,
    pub shape: JobShape,
    /// The number of reduce tasks, which is also the number of output partitions
    pub reduce_n: usize,
    /// Where intermediate and output files live
    pub work_dir: PathBuf,
}

impl JobSpec {
    pub fn map_n(&self) -> usize {
        self.inputs.len()
    }

    /// `mr-{map}-{reduce}.txt`
    pub fn intermediate_file(&self, map_id: usize, reduce_id: usize) -> PathBuf {
        self.work_dir.join(format!("mr-{}-{}.txt", map_id, reduce_id))
    }

    /// `mr-out-{reduce}.txt`
    pub fn output_file(&self, reduce_id: usize) -> PathBuf {
        self.work_dir.join(format!("mr-out-{}.txt", reduce_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Map,
    Reduce,
}

/// The coordinator's answer to a task request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    /// Nothing to hand out right now, ask again later
    Wait,
    /// Run this task
    Task(usize),
    /// Every task of the requested phase has finished
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TaskState {
    Idle,
    /// Running since the last lease renewal
    Running(Instant),
    Finished,
}

#[derive(Debug)]
struct Tasks {
    states: Vec<TaskState>,
}

impl Tasks {
    fn new(n: usize) -> Self {
        Self {
            states: vec![TaskState::Idle; n],
        }
    }

    fn assign(&mut self) -> Assignment {
        if self.all_finished() {
            return Assignment::Exit;
        }
        match self.states.iter().position(|s| *s == TaskState::Idle) {
            Some(id) => {
                self.states[id] = TaskState::Running(Instant::now());
                Assignment::Task(id)
            }
            None => Assignment::Wait,
        }
    }

    fn renew(&mut self, id: usize) -> bool {
        match self.states.get_mut(id) {
            Some(state @ TaskState::Running(_)) => {
                *state = TaskState::Running(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Returns `false` if the task was unknown or had already finished
    fn finish(&mut self, id: usize) -> bool {
        match self.states.get_mut(id) {
            Some(TaskState::Finished) | None => false,
            Some(state) => {
                *state = TaskState::Finished;
                true
            }
        }
    }

    fn reclaim_stale(&mut self, lease: Duration) -> Vec<usize> {
        let mut stale = Vec::new();
        for (id, state) in self.states.iter_mut().enumerate() {
            if let TaskState::Running(since) = state {
                if since.elapsed() >= lease {
                    *state = TaskState::Idle;
                    stale.push(id);
                }
            }
        }
        stale
    }

    fn all_finished(&self) -> bool {
        self.states.iter().all(|s| *s == TaskState::Finished)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    spec: Arc<JobSpec>,
    /// One entry per input matrix
    map_tasks: Arc<Mutex<Tasks>>,
    /// One entry per output partition
    reduce_tasks: Arc<Mutex<Tasks>>,
    /// The next worker id to hand out, starts from 0
    worker_id: Arc<Mutex<usize>>,
    /// The number of worker processes, no task is handed out until all of them connected
    worker_n: usize,
    /// A running task whose lease is older than this is handed to another worker
    lease: Duration,
    /// Cell failures reported per reduce task, a re-run task replaces its entry
    failures: Arc<Mutex<BTreeMap<usize, Vec<String>>>>,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(spec: JobSpec, worker_n: usize, lease: Duration) -> Self {
        Self {
            map_tasks: Arc::new(Mutex::new(Tasks::new(spec.map_n()))),
            reduce_tasks: Arc::new(Mutex::new(Tasks::new(spec.reduce_n))),
            spec: Arc::new(spec),
            worker_id: Arc::new(Mutex::new(0)),
            worker_n,
            lease,
            failures: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Check if the specified number of worker processes have connected
    pub fn prepare(&self) -> bool {
        *lock(&self.worker_id) >= self.worker_n
    }

    /// Check if the overall MapReduce process has finished
    pub fn done(&self) -> bool {
        lock(&self.map_tasks).all_finished() && lock(&self.reduce_tasks).all_finished()
    }

    /// Every cell failure reported by the reduce tasks
    pub fn failures(&self) -> Vec<String> {
        lock(&self.failures).values().flatten().cloned().collect()
    }

    /// Put tasks whose lease ran out back to the idle pool, returns how many were reclaimed
    pub fn check_lease(&self) -> usize {
        let (phase, stale) = if lock(&self.map_tasks).all_finished() {
            (Phase::Reduce, lock(&self.reduce_tasks).reclaim_stale(self.lease))
        } else {
            (Phase::Map, lock(&self.map_tasks).reclaim_stale(self.lease))
        };
        for id in &stale {
            log::warn!(
                "[Check Lease] Stale {:?} task #{} detected, the previous worker may have gone offline, it will be assigned to a new worker",
                phase,
                id
            );
        }
        stale.len()
    }

    /// Listen for workers on `addr` and serve them in the background, returns the bound address
    pub async fn listen(&self, addr: SocketAddr) -> anyhow::Result<SocketAddr> {
        let mut listener = tarpc::serde_transport::tcp::listen(addr, Json::default).await?;
        listener.config_mut().max_frame_length(usize::MAX);
        let local_addr = listener.local_addr();
        tokio::spawn(
            listener
                // Accepts if this is a valid connection, otherwise ignores this connection
                .filter_map(|r| async { r.ok() })
                .map(tarpc::server::BaseChannel::with_defaults)
                .execute(JobServer::serve(self.clone())),
        );
        Ok(local_addr)
    }
}

/// RPC related for Coordinator
#[tarpc::service]
pub trait JobServer {
    /// Get a unique worker id, `None` once the configured number of workers connected
    async fn register() -> Option<usize>;
    /// Get the job description
    async fn get_job_spec() -> JobSpec;
    /// Get a map task
    async fn get_map_task() -> Assignment;
    /// Get a reduce task
    /// Note that reduce phase won't begin until all map tasks have finished
    async fn get_reduce_task() -> Assignment;
    /// Report map task has finished
    async fn report_map_task_finish(id: usize) -> bool;
    /// Report reduce task has finished, along with the cells it could not compute
    async fn report_reduce_task_finish(id: usize, failures: Vec<String>) -> bool;
    /// Renew the lease of a running task
    async fn renew_lease(phase: Phase, id: usize) -> bool;
}

#[tarpc::server]
impl JobServer for Coordinator {
    type RegisterFut = Ready<Option<usize>>;
    type GetJobSpecFut = Ready<JobSpec>;
    type GetMapTaskFut = Ready<Assignment>;
    type GetReduceTaskFut = Ready<Assignment>;
    type ReportMapTaskFinishFut = Ready<bool>;
    type ReportReduceTaskFinishFut = Ready<bool>;
    type RenewLeaseFut = Ready<bool>;

    /// The worker will call this first when connecting
    fn register(self, _: context::Context) -> Self::RegisterFut {
        let mut worker_id = lock(&self.worker_id);
        if *worker_id >= self.worker_n {
            log::warn!("[Preparation] Rejected a worker, all #{} workers have already connected", self.worker_n);
            return ready(None);
        }
        let id = *worker_id;
        *worker_id += 1;
        log::info!(
            "[Preparation] Worker #{} connected, #{} more worker(s) needed!",
            id,
            self.worker_n - id - 1
        );
        if id + 1 == self.worker_n {
            log::info!("[Preparation] All worker processes have connected, Map Phase will then begin!");
        }
        ready(Some(id))
    }

    fn get_job_spec(self, _: context::Context) -> Self::GetJobSpecFut {
        ready(self.spec.as_ref().clone())
    }

    fn get_map_task(self, _: context::Context) -> Self::GetMapTaskFut {
        if !self.prepare() {
            return ready(Assignment::Wait);
        }
        let assignment = lock(&self.map_tasks).assign();
        if let Assignment::Task(id) = assignment {
            log::info!(
                "[Map] Assigned map task #{} ({}) to worker",
                id,
                self.spec.inputs[id].display()
            );
        }
        ready(assignment)
    }

    fn get_reduce_task(self, _: context::Context) -> Self::GetReduceTaskFut {
        if !lock(&self.map_tasks).all_finished() {
            return ready(Assignment::Wait);
        }
        let assignment = lock(&self.reduce_tasks).assign();
        if let Assignment::Task(id) = assignment {
            log::info!("[Reduce] Assigned reduce task #{} to worker", id);
        }
        ready(assignment)
    }

    fn report_map_task_finish(self, _: context::Context, id: usize) -> Self::ReportMapTaskFinishFut {
        let mut map_tasks = lock(&self.map_tasks);
        if !map_tasks.finish(id) {
            log::warn!("[Map] Ignored a duplicate report for map task #{}", id);
            return ready(false);
        }
        log::info!("[Map] Map task #{} has been finished", id);
        if map_tasks.all_finished() {
            log::info!("[Map] All map tasks have been finished by worker processes, the reduce phase will then begin!");
        }
        ready(true)
    }

    fn report_reduce_task_finish(
        self,
        _: context::Context,
        id: usize,
        failures: Vec<String>,
    ) -> Self::ReportReduceTaskFinishFut {
        let mut reduce_tasks = lock(&self.reduce_tasks);
        if !reduce_tasks.finish(id) {
            log::warn!("[Reduce] Ignored a duplicate report for reduce task #{}", id);
            return ready(false);
        }
        if failures.is_empty() {
            log::info!("[Reduce] Reduce task #{} has been finished", id);
        } else {
            log::error!("[Reduce] Reduce task #{} finished with #{} failed cell(s)", id, failures.len());
        }
        lock(&self.failures).insert(id, failures);
        if reduce_tasks.all_finished() {
            log::info!("[Reduce] All reduce tasks have been finished by worker processes, MapReduce has finished!");
        }
        ready(true)
    }

    /// The worker will call this every second while working on a task
    fn renew_lease(self, _: context::Context, phase: Phase, id: usize) -> Self::RenewLeaseFut {
        let renewed = match phase {
            Phase::Map => lock(&self.map_tasks).renew(id),
            Phase::Reduce => lock(&self.reduce_tasks).renew(id),
        };
        ready(renewed)
    }
}
