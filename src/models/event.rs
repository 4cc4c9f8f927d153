use chrono::{DateTime, Utc};

/// 进程表查询返回的一个运行中进程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub path: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Stop,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
        }
    }
}

/// 事件源上报的进程启动或停止
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub kind: EventKind,
    pub name: String,
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
}

impl ProcessEvent {
    pub fn start(name: impl Into<String>, pid: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::Start,
            name: name.into(),
            pid,
            timestamp,
        }
    }

    pub fn stop(name: impl Into<String>, pid: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::Stop,
            name: name.into(),
            pid,
            timestamp,
        }
    }

    pub fn is_start(&self) -> bool {
        self.kind == EventKind::Start
    }
}
