use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::models::{InstanceChange, ProcessEvent, Program, SnapshotEntry, UNKNOWN_DESCRIPTION};
use crate::services::lookup::{DescriptionResolver, ProcessLookup};
use crate::services::unresolved::UnresolvedStartBuffer;
use crate::state::AppState;

/// 无法与已记录历史对应的启动或停止，只记录日志和计数，不修改状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// 同一程序中该 pid 的实例仍然活跃时又收到启动
    DuplicateStart,
    /// 程序没有打开的使用会话时收到停止
    StopWhileNotRunning,
    /// 停止的 pid 不在当前会话中
    UnknownInstanceStop,
    /// 既未跟踪也未缓存的程序收到停止
    UnknownProgramStop,
    /// 新建程序时发现同名程序已被跟踪
    DuplicateRegistration,
}

impl Anomaly {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anomaly::DuplicateStart => "duplicate_start",
            Anomaly::StopWhileNotRunning => "stop_while_not_running",
            Anomaly::UnknownInstanceStop => "unknown_instance_stop",
            Anomaly::UnknownProgramStop => "unknown_program_stop",
            Anomaly::DuplicateRegistration => "duplicate_registration",
        }
    }
}

/// 单个快照条目或事件对注册表的影响
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    ProgramAdded,
    SessionOpened,
    InstanceAdded,
    InstanceEnded,
    SessionClosed,
    /// 新程序启动，但查询不到对应进程
    UnresolvedStart,
    /// 与之前未解析的启动配对的停止
    UnresolvedStopMatched,
    Anomaly(Anomaly),
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::ProgramAdded => "program_added",
            EventOutcome::SessionOpened => "session_opened",
            EventOutcome::InstanceAdded => "instance_added",
            EventOutcome::InstanceEnded => "instance_ended",
            EventOutcome::SessionClosed => "session_closed",
            EventOutcome::UnresolvedStart => "unresolved_start",
            EventOutcome::UnresolvedStopMatched => "unresolved_stop_matched",
            EventOutcome::Anomaly(_) => "anomaly",
        }
    }
}

impl From<InstanceChange> for EventOutcome {
    fn from(change: InstanceChange) -> Self {
        match change {
            InstanceChange::SessionOpened => EventOutcome::SessionOpened,
            InstanceChange::InstanceAdded => EventOutcome::InstanceAdded,
            InstanceChange::InstanceEnded => EventOutcome::InstanceEnded,
            InstanceChange::SessionClosed => EventOutcome::SessionClosed,
            InstanceChange::DuplicateStart => EventOutcome::Anomaly(Anomaly::DuplicateStart),
            InstanceChange::NotRunning => EventOutcome::Anomaly(Anomaly::StopWhileNotRunning),
            InstanceChange::UnknownInstance => EventOutcome::Anomaly(Anomaly::UnknownInstanceStop),
        }
    }
}

/// 把进程的启动和停止关联成按程序划分的使用会话
///
/// 自身不做同步，只能由一个持有者驱动（见 `RecorderHandle`），该持有者就是注册表唯一的写入方。
/// 文件系统和进程查询都在获取注册表锁之前完成。
pub struct ProgramRecorder {
    state: AppState,
    unresolved: UnresolvedStartBuffer,
    lookup: Arc<dyn ProcessLookup>,
    resolver: Arc<dyn DescriptionResolver>,
}

impl ProgramRecorder {
    pub fn new(
        state: AppState,
        lookup: Arc<dyn ProcessLookup>,
        resolver: Arc<dyn DescriptionResolver>,
    ) -> Self {
        Self {
            state,
            unresolved: UnresolvedStartBuffer::new(),
            lookup,
            resolver,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn unresolved(&self) -> &UnresolvedStartBuffer {
        &self.unresolved
    }

    /// 导入上一次运行的程序记录，已跟踪的同名程序会被跳过
    pub fn restore(&mut self, programs: Vec<Program>) -> usize {
        let mut tracked = self.state.lock();
        let mut restored = 0;
        for program in programs {
            let name = program.exe_name.clone();
            if tracked.try_insert(program) {
                restored += 1;
            } else {
                log::warn!("Skipping duplicate stored program {}", name);
            }
        }
        restored
    }

    /// 关闭上一次异常退出遗留的使用会话，必须在第一个快照或事件之前调用
    ///
    /// 返回受影响的程序名
    pub fn reconcile_stray_sessions(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut tracked = self.state.lock();
        let mut closed = Vec::new();
        for program in tracked.running_mut() {
            program.end_all_instances(now);
            log::warn!(
                "{}'s session was not closed when the monitor last shut down. \
                 It has been closed now, so its total run time is overstated",
                program.exe_name
            );
            closed.push(program.exe_name.clone());
        }
        closed
    }

    /// 记录启动时已在运行的所有进程
    pub fn ingest_snapshot(&mut self, entries: Vec<SnapshotEntry>) -> Vec<EventOutcome> {
        log::info!("Recording snapshot of {} processes", entries.len());
        let outcomes: Vec<EventOutcome> = entries
            .into_iter()
            .map(|entry| {
                let name = entry.name.clone();
                let existing = self
                    .state
                    .lock()
                    .get_mut(&entry.name)
                    .map(|program| program.register_instance(entry.pid, entry.started_at));
                let outcome = match existing {
                    Some(change) => change.into(),
                    None => self.record_new_program(entry),
                };
                self.report(&outcome, &name);
                outcome
            })
            .collect();
        log::info!("Snapshot recorded, {} programs tracked", self.state.lock().len());
        outcomes
    }

    /// 处理一个实时的启动或停止事件
    pub fn handle_event(&mut self, event: ProcessEvent) -> EventOutcome {
        let outcome = if event.is_start() {
            self.handle_start(&event)
        } else {
            self.handle_stop(&event)
        };
        self.report(&outcome, &event.name);
        outcome
    }

    /// 在 `now` 结束所有打开的会话，关闭时调用一次
    ///
    /// 返回仍在运行的程序名
    pub fn force_close_all(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut tracked = self.state.lock();
        let closed: Vec<String> = tracked
            .running_mut()
            .map(|program| {
                program.end_all_instances(now);
                log::debug!("Closed session of {} on shutdown", program.exe_name);
                program.exe_name.clone()
            })
            .collect();
        closed
    }

    fn handle_start(&mut self, event: &ProcessEvent) -> EventOutcome {
        let existing = self
            .state
            .lock()
            .get_mut(&event.name)
            .map(|program| program.register_instance(event.pid, event.timestamp));
        if let Some(change) = existing {
            log::debug!("New instance of tracked program {} (pid {})", event.name, event.pid);
            return change.into();
        }

        log::debug!("New instance of untracked program {} (pid {})", event.name, event.pid);
        match self.lookup.find_process(&event.name, event.pid) {
            Ok(entry) => self.record_new_program(entry),
            Err(e) => {
                self.unresolved.insert(&event.name, event.pid);
                log::info!(
                    "{} started but could not be queried: {} ({} unresolved starts pending)",
                    event.name,
                    e,
                    self.unresolved.len()
                );
                EventOutcome::UnresolvedStart
            }
        }
    }

    fn handle_stop(&mut self, event: &ProcessEvent) -> EventOutcome {
        let existing = self
            .state
            .lock()
            .get_mut(&event.name)
            .map(|program| program.end_instance(event.pid, event.timestamp));

        match existing {
            Some(InstanceChange::NotRunning | InstanceChange::UnknownInstance)
                if self.unresolved.take(&event.name, event.pid) =>
            {
                // 该实例的启动丢失后，程序已通过其他实例被跟踪
                EventOutcome::UnresolvedStopMatched
            }
            Some(change) => change.into(),
            None if self.unresolved.take(&event.name, event.pid) => {
                log::debug!("End of unresolved {} (pid {})", event.name, event.pid);
                EventOutcome::UnresolvedStopMatched
            }
            None => EventOutcome::Anomaly(Anomaly::UnknownProgramStop),
        }
    }

    fn record_new_program(&mut self, entry: SnapshotEntry) -> EventOutcome {
        let description = match self.resolver.describe(&entry.path) {
            Ok(description) => description,
            Err(e) => {
                log::debug!("No description for {}: {}", entry.name, e);
                UNKNOWN_DESCRIPTION.to_string()
            }
        };

        let program = Program::new(entry.name, description, entry.path, entry.pid, entry.started_at);
        if self.state.lock().try_insert(program) {
            EventOutcome::ProgramAdded
        } else {
            EventOutcome::Anomaly(Anomaly::DuplicateRegistration)
        }
    }

    fn report(&self, outcome: &EventOutcome, source: &str) {
        match outcome {
            EventOutcome::Anomaly(Anomaly::DuplicateStart) => log::warn!(
                "{}: new instance has the pid of an instance that is still active",
                source
            ),
            EventOutcome::Anomaly(Anomaly::StopWhileNotRunning) => log::warn!(
                "{}: instance stopped but the program was not flagged as running",
                source
            ),
            EventOutcome::Anomaly(Anomaly::UnknownInstanceStop) => log::warn!(
                "{}: instance stopped but no active instance has that pid",
                source
            ),
            EventOutcome::Anomaly(Anomaly::UnknownProgramStop) => {
                log::warn!("{}: end of process for an untracked program", source)
            }
            EventOutcome::Anomaly(Anomaly::DuplicateRegistration) => {
                log::warn!("{}: new program was already tracked", source)
            }
            other => log::trace!("{}: {}", source, other.as_str()),
        }
    }
}
