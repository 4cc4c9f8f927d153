use anyhow::{anyhow, Context};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::metrics::METRICS;
use crate::models::{ProcessEvent, Program, SnapshotEntry};
use crate::services::recorder::ProgramRecorder;

pub enum RecorderCommand {
    Restore(Vec<Program>),
    Reconcile {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    Snapshot(Vec<SnapshotEntry>),
    Event(ProcessEvent),
    Shutdown {
        respond_to: oneshot::Sender<Vec<String>>,
    },
}

/// 可克隆的实时进程事件发送端
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<RecorderCommand>,
}

impl EventSender {
    /// recorder 不再接收事件时返回 false
    pub fn send(&self, event: ProcessEvent) -> bool {
        self.sender.send(RecorderCommand::Event(event)).is_ok()
    }
}

/// 在独立线程上持有 recorder
///
/// 快照、事件和生命周期命令共用一个 channel，严格按到达顺序处理。
pub struct RecorderHandle {
    sender: mpsc::UnboundedSender<RecorderCommand>,
    task: JoinHandle<()>,
}

impl RecorderHandle {
    pub fn spawn(recorder: ProgramRecorder) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        // 查询会访问文件系统和 /proc，放到阻塞线程上运行
        let task = tokio::task::spawn_blocking(move || run(recorder, receiver));
        Self { sender, task }
    }

    pub fn events(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    pub fn restore(&self, programs: Vec<Program>) -> anyhow::Result<()> {
        self.send(RecorderCommand::Restore(programs))
    }

    /// 关闭异常退出遗留的会话，返回受影响的程序名
    pub async fn reconcile(&self) -> anyhow::Result<Vec<String>> {
        let (respond_to, response) = oneshot::channel();
        self.send(RecorderCommand::Reconcile { respond_to })?;
        response.await.context("recorder dropped the reconcile request")
    }

    pub fn ingest_snapshot(&self, entries: Vec<SnapshotEntry>) -> anyhow::Result<()> {
        self.send(RecorderCommand::Snapshot(entries))
    }

    /// 停止接收命令，处理完已排队的命令后关闭所有打开的会话
    ///
    /// 返回仍在运行的程序名
    pub async fn shutdown(self) -> anyhow::Result<Vec<String>> {
        let (respond_to, response) = oneshot::channel();
        self.send(RecorderCommand::Shutdown { respond_to })?;
        let closed = response.await.context("recorder stopped before shutdown completed")?;
        self.task.await.context("recorder task failed")?;
        Ok(closed)
    }

    fn send(&self, command: RecorderCommand) -> anyhow::Result<()> {
        self.sender
            .send(command)
            .map_err(|_| anyhow!("recorder is no longer running"))
    }
}

fn run(mut recorder: ProgramRecorder, mut receiver: mpsc::UnboundedReceiver<RecorderCommand>) {
    log::info!("Program recorder started");

    while let Some(command) = receiver.blocking_recv() {
        let respond_to = match command {
            RecorderCommand::Shutdown { respond_to } => respond_to,
            other => {
                apply(&mut recorder, other);
                continue;
            }
        };

        receiver.close();
        let mut drained = 0;
        while let Some(pending) = receiver.blocking_recv() {
            apply(&mut recorder, pending);
            drained += 1;
        }
        let closed = recorder.force_close_all(Utc::now());
        log::info!(
            "Program recorder stopped ({} queued commands drained, {} sessions closed)",
            drained,
            closed.len()
        );
        if !recorder.unresolved().is_empty() {
            log::debug!(
                "{} unresolved starts never saw a stop",
                recorder.unresolved().len()
            );
        }
        let _ = respond_to.send(closed);
        return;
    }

    let closed = recorder.force_close_all(Utc::now());
    log::info!("Program recorder channel closed, {} sessions closed", closed.len());
}

fn apply(recorder: &mut ProgramRecorder, command: RecorderCommand) {
    match command {
        RecorderCommand::Restore(programs) => {
            let restored = recorder.restore(programs);
            log::info!("Restored {} programs from checkpoint", restored);
        }
        RecorderCommand::Reconcile { respond_to } => {
            let stray = recorder.reconcile_stray_sessions(Utc::now());
            METRICS.record_stray_sessions(stray.len());
            let _ = respond_to.send(stray);
        }
        RecorderCommand::Snapshot(entries) => {
            for outcome in recorder.ingest_snapshot(entries) {
                METRICS.record_outcome("snapshot", &outcome);
            }
        }
        RecorderCommand::Event(event) => {
            let kind = event.kind;
            let outcome = recorder.handle_event(event);
            METRICS.record_outcome(kind.as_str(), &outcome);
        }
        // 排空期间的第二次 shutdown 没有可关闭的会话
        RecorderCommand::Shutdown { respond_to } => {
            let _ = respond_to.send(Vec::new());
        }
    }
}
