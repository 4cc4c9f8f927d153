use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::{ProcessEvent, SnapshotEntry};
use crate::services::lookup::ProcessSnapshotProvider;
use crate::services::process_checker::ProcessFilter;
use crate::services::recorder_handle::EventSender;

/// 以 pid 为键的进程表
pub type ProcessTable = HashMap<u32, SnapshotEntry>;

pub fn to_table(entries: &[SnapshotEntry]) -> ProcessTable {
    entries.iter().map(|e| (e.pid, e.clone())).collect()
}

/// 计算两次进程表之间的启动/停止事件
///
/// 同一 pid 的启动时间或名称变了，说明 pid 被复用：旧进程在新进程启动前就已退出，
/// 所以这条停止事件用新进程的启动时间。其余停止事件用检测时间 `now`。
/// 启动事件用进程自身的启动时间，但限制在 `since`（上一次扫描）和 `now` 之间。
///
/// 返回的事件按时间排序，同一时刻停止在前。
pub fn diff_tables(
    previous: &ProcessTable,
    current: &ProcessTable,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<ProcessEvent> {
    let started = |entry: &SnapshotEntry| entry.started_at.max(since).min(now);
    let mut events = Vec::new();

    for (pid, old) in previous {
        match current.get(pid) {
            Some(new) if new.started_at == old.started_at && new.name == old.name => {}
            Some(new) => {
                let at = started(new);
                events.push(ProcessEvent::stop(&old.name, *pid, at));
                events.push(ProcessEvent::start(&new.name, *pid, at));
            }
            None => events.push(ProcessEvent::stop(&old.name, *pid, now)),
        }
    }
    for (pid, new) in current {
        if !previous.contains_key(pid) {
            events.push(ProcessEvent::start(&new.name, *pid, started(new)));
        }
    }

    events.sort_by_key(|e| (e.timestamp, e.is_start(), e.pid));
    events
}

/// 定期轮询进程表，把差异转换成启动/停止事件
pub struct ProcessWatcher {
    provider: Arc<dyn ProcessSnapshotProvider>,
    filter: ProcessFilter,
    interval: Duration,
    table: ProcessTable,
    scanned_at: DateTime<Utc>,
}

impl ProcessWatcher {
    /// `initial` 是 recorder 启动时导入的快照，其中的进程不会再次上报
    pub fn new(
        provider: Arc<dyn ProcessSnapshotProvider>,
        filter: ProcessFilter,
        interval: Duration,
        initial: &[SnapshotEntry],
    ) -> Self {
        Self {
            provider,
            filter,
            interval,
            table: to_table(initial),
            scanned_at: Utc::now(),
        }
    }

    /// 执行一次轮询，扫描失败时返回 `None`
    pub async fn poll(&mut self) -> Option<Vec<ProcessEvent>> {
        let provider = self.provider.clone();
        let entries = match tokio::task::spawn_blocking(move || provider.running_processes()).await {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Process scan failed: {}", e);
                return None;
            }
        };

        let current: ProcessTable = entries
            .into_iter()
            .filter(|e| self.filter.allows(&e.name))
            .map(|e| (e.pid, e))
            .collect();
        let now = Utc::now();
        let events = diff_tables(&self.table, &current, self.scanned_at, now);
        self.table = current;
        self.scanned_at = now;
        Some(events)
    }

    /// 运行到 `shutdown` 变为 true，或 recorder 不再接收事件为止
    pub fn spawn(mut self, events: EventSender, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            log::info!("Process watcher started (every {:?})", self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let Some(batch) = self.poll().await else {
                    continue;
                };
                for event in batch {
                    log::debug!("{} {} (pid {})", event.kind.as_str(), event.name, event.pid);
                    if !events.send(event) {
                        log::info!("Recorder closed, stopping process watcher");
                        return;
                    }
                }
            }
            log::info!("Process watcher stopped");
        })
    }
}
