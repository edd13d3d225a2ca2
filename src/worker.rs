use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::child::{ChildExit, ChildSupervisor};
use crate::constants::{PARENT_PID_ENV, worker_key};
use crate::gateway::{self, RedisGateway};
use crate::hooks::Hooks;
use crate::job::{self, FailureCause, JobPayload, JobRecord};
use crate::process::{ProcessProbe, SystemProcesses};
use crate::queue;
use crate::registry::{self, WorkerId, WorkingOn};
use crate::settings::ResqueSettings;
use crate::status::{self, JobStatus};
use crate::task::TaskRegistry;

/// Control flags shared between the worker loop, its signal listener and
/// any external supervisor. Signal handlers only ever store into these; the
/// loop and the child-reap poll observe them at their suspension points.
#[derive(Debug, Default)]
pub struct Control {
    shutdown: AtomicBool,
    paused: AtomicBool,
    kill_child: AtomicBool,
}

impl Control {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn request_kill_child(&self) {
        self.kill_child.store(true, Ordering::SeqCst);
    }

    /// Consume a pending kill request. At most one observer acts on each
    /// request.
    pub fn take_kill_child(&self) -> bool {
        self.kill_child.swap(false, Ordering::SeqCst)
    }
}

/// A long-lived process that reserves jobs from an ordered queue list and
/// executes them one at a time, each in an isolated child when a child
/// command is configured.
pub struct Worker {
    settings: ResqueSettings,
    id: WorkerId,
    id_string: String,
    gateway: RedisGateway,
    tasks: TaskRegistry,
    hooks: Hooks,
    probe: Arc<dyn ProcessProbe>,
    control: Arc<Control>,
    supervisor: Option<ChildSupervisor>,
    parent_pid: Option<u32>,
    signal_task: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(settings: ResqueSettings, queues: Vec<String>, tasks: TaskRegistry) -> Result<Self> {
        if queues.is_empty() {
            return Err(anyhow::anyhow!(
                "worker must be configured with at least one queue"
            ));
        }
        let id = WorkerId::local(queues)?;
        let id_string = id.to_string();
        let gateway = RedisGateway::new(&settings.redis_dsn)?;
        let supervisor = match settings.child_cmd.clone() {
            Some(cmd) => Some(ChildSupervisor::new(cmd)?),
            None => None,
        };
        let parent_pid = std::env::var(PARENT_PID_ENV)
            .ok()
            .and_then(|value| value.parse::<u32>().ok());
        Ok(Self {
            settings,
            id,
            id_string,
            gateway,
            tasks,
            hooks: Hooks::default(),
            probe: Arc::new(SystemProcesses::new()),
            control: Arc::new(Control::new()),
            supervisor,
            parent_pid,
            signal_task: None,
        })
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_parent_pid(mut self, parent_pid: Option<u32>) -> Self {
        self.parent_pid = parent_pid;
        self
    }

    pub fn id(&self) -> &str {
        &self.id_string
    }

    pub fn control(&self) -> Arc<Control> {
        self.control.clone()
    }

    /// Graceful shutdown: finish the current job, then exit.
    pub fn shutdown(&self) {
        self.control.request_shutdown();
    }

    /// Immediate shutdown: kill the in-flight child, then exit.
    pub fn shutdown_now(&self) {
        self.control.request_shutdown();
        self.control.request_kill_child();
    }

    pub fn kill_child(&self) {
        self.control.request_kill_child();
    }

    pub fn pause_processing(&self) {
        self.control.pause();
    }

    pub fn unpause_processing(&self) {
        self.control.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Run until shutdown. Registration and pruning happen on entry,
    /// unregistration on exit regardless of how the loop ended.
    pub async fn run(&mut self) -> Result<()> {
        self.startup().await?;
        let outcome = self.work_loop().await;
        if let Some(task) = self.signal_task.take() {
            task.abort();
        }
        let cleanup = registry::unregister(
            &mut self.gateway,
            &self.id,
            self.settings.status_ttl_seconds,
        )
        .await;
        tracing::info!(worker = %self.id_string, "worker stopped");
        outcome.and(cleanup)
    }

    async fn startup(&mut self) -> Result<()> {
        self.gateway
            .connect()
            .await
            .context("worker startup requires a reachable Redis")?;
        registry::prune_dead_workers(
            &mut self.gateway,
            self.probe.as_ref(),
            &self.id,
            self.settings.status_ttl_seconds,
        )
        .await?;
        registry::register(&mut self.gateway, &self.id).await?;
        self.signal_task = Some(install_signal_handlers(self.control.clone())?);
        self.hooks.before_first_fork();
        tracing::info!(
            worker = %self.id_string,
            interval = self.settings.interval_seconds,
            blocking = self.settings.blocking,
            "worker started"
        );
        Ok(())
    }

    async fn work_loop(&mut self) -> Result<()> {
        loop {
            if self.control.is_shutdown() {
                break;
            }
            if self.control.take_kill_child() {
                tracing::debug!("kill-child requested with no child in flight");
            }

            // The ping doubles as the only reconnection point: a lost
            // connection drops the handle and the next use redials.
            if let Err(err) = self.gateway.ping().await {
                if gateway::is_disconnect(&err) {
                    tracing::warn!(error = %err, "redis unreachable; will reconnect");
                    self.gateway.reset();
                    self.idle_wait().await;
                    continue;
                }
                return Err(err);
            }

            if self.control.is_paused() {
                self.idle_wait().await;
                continue;
            }

            let reserved = match self.reserve_job().await {
                Ok(reserved) => reserved,
                Err(err) if gateway::is_disconnect(&err) => {
                    tracing::warn!(error = %err, "redis dropped during reservation");
                    self.gateway.reset();
                    self.idle_wait().await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let Some(payload) = reserved else {
                if self.settings.interval_seconds == 0.0 {
                    break;
                }
                if !self.settings.blocking {
                    // Blocking mode already consumed the wait inside BLPOP.
                    self.idle_wait().await;
                }
                continue;
            };

            self.process(payload).await?;
        }
        Ok(())
    }

    async fn idle_wait(&self) {
        let seconds = if self.settings.interval_seconds > 0.0 {
            self.settings.interval_seconds
        } else {
            0.1
        };
        sleep_with_flags(&self.control, Duration::from_secs_f64(seconds)).await;
    }

    async fn reserve_job(&mut self) -> Result<Option<JobPayload>> {
        if let Some(parent) = self.parent_pid
            && !self.probe.pid_alive(parent)
        {
            tracing::info!(parent_pid = parent, "parent gone; shutting down");
            self.control.request_shutdown();
            return Ok(None);
        }

        let queues = queue::effective_queues(&mut self.gateway, &self.id.queues).await?;
        if self.settings.blocking {
            let timeout = if self.settings.interval_seconds > 0.0 {
                self.settings.interval_seconds
            } else {
                1.0
            };
            queue::reserve_blocking(&mut self.gateway, &queues, timeout).await
        } else {
            queue::reserve(&mut self.gateway, &queues).await
        }
    }

    async fn process(&mut self, payload: JobPayload) -> Result<()> {
        tracing::info!(
            job_id = %payload.id,
            class = %payload.class,
            queue = %payload.queue,
            "got job"
        );
        let mut job = JobRecord::new(payload, self.id_string.clone());
        self.hooks.before_fork(&job.payload);
        self.working_on(&job).await?;

        match self.supervisor.clone() {
            Some(supervisor) => match supervisor.spawn(&job.payload, &self.id_string).await {
                Ok(mut running) => {
                    self.hooks.after_fork(&job.payload);
                    let exit = running.reap(&self.control, self.probe.as_ref()).await?;
                    self.settle_child_exit(&job, exit).await?;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "child spawn failed; running job in-process");
                    self.hooks.after_fork(&job.payload);
                    job::execute_and_account(
                        &mut self.gateway,
                        &self.tasks,
                        Some(&self.hooks),
                        &mut job,
                        self.settings.status_ttl_seconds,
                    )
                    .await?;
                }
            },
            None => {
                self.hooks.after_fork(&job.payload);
                job::execute_and_account(
                    &mut self.gateway,
                    &self.tasks,
                    Some(&self.hooks),
                    &mut job,
                    self.settings.status_ttl_seconds,
                )
                .await?;
            }
        }

        self.done_working(&job).await
    }

    async fn settle_child_exit(&mut self, job: &JobRecord, exit: ChildExit) -> Result<()> {
        match exit {
            ChildExit::Clean => {
                // The child normally records the terminal status itself;
                // promote only a job that came back without one.
                let current = status::current(&mut self.gateway, &job.payload.id).await?;
                match current {
                    Some(current) if current.is_terminal() => Ok(()),
                    _ => {
                        job.complete(&mut self.gateway, self.settings.status_ttl_seconds)
                            .await
                    }
                }
            }
            ChildExit::Code(code) => {
                self.fail_dirty(job, format!("Job exited with exit code {code}"))
                    .await
            }
            ChildExit::Signaled => self.fail_dirty(job, "Job exited abnormally".to_string()).await,
        }
    }

    async fn fail_dirty(&mut self, job: &JobRecord, message: String) -> Result<()> {
        let cause = FailureCause {
            exception: "DirtyExit".to_string(),
            error: message,
            backtrace: Vec::new(),
            queue: job.payload.queue.clone(),
            failed_at: Utc::now(),
        };
        job.fail(
            &mut self.gateway,
            cause,
            Some(&self.hooks),
            self.settings.status_ttl_seconds,
        )
        .await
    }

    async fn working_on(&mut self, job: &JobRecord) -> Result<()> {
        let working = WorkingOn {
            queue: job.payload.queue.clone(),
            run_at: Utc::now(),
            payload: job.payload.clone(),
        };
        self.gateway
            .set(
                &worker_key(&self.id_string),
                &serde_json::to_string(&working)?,
            )
            .await?;
        job.update_status(
            &mut self.gateway,
            JobStatus::Running,
            self.settings.status_ttl_seconds,
        )
        .await
    }

    async fn done_working(&mut self, _job: &JobRecord) -> Result<()> {
        self.gateway.del(&worker_key(&self.id_string)).await
    }
}

async fn sleep_with_flags(control: &Control, duration: Duration) {
    let step = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO && !control.is_shutdown() {
        let next = remaining.min(step);
        tokio::time::sleep(next).await;
        remaining = remaining.saturating_sub(next);
    }
}

/// Map OS signals onto control flags. The handler task does nothing but
/// store; every effect is observed at the loop's suspension points.
///
/// TERM, INT  => shutdown now (stop loop, kill child)
/// QUIT       => graceful shutdown (finish current job)
/// USR1       => kill the in-flight child, keep reserving
/// USR2       => pause
/// CONT       => resume
fn install_signal_handlers(control: Arc<Control>) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut cont = signal(SignalKind::from_raw(
        nix::sys::signal::Signal::SIGCONT as i32,
    ))?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = term.recv() => {
                    tracing::info!("SIGTERM: shutting down now");
                    control.request_shutdown();
                    control.request_kill_child();
                }
                _ = interrupt.recv() => {
                    tracing::info!("SIGINT: shutting down now");
                    control.request_shutdown();
                    control.request_kill_child();
                }
                _ = quit.recv() => {
                    tracing::info!("SIGQUIT: graceful shutdown");
                    control.request_shutdown();
                }
                _ = usr1.recv() => {
                    tracing::info!("SIGUSR1: killing child");
                    control.request_kill_child();
                }
                _ = usr2.recv() => {
                    tracing::info!("SIGUSR2: pausing");
                    control.pause();
                }
                _ = cont.recv() => {
                    tracing::info!("SIGCONT: resuming");
                    control.resume();
                }
            }
        }
    }))
}
