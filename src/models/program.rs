use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::UsageSession;

/// 无法获取程序描述时使用的占位文本
pub const UNKNOWN_DESCRIPTION: &str = "None available";

/// 把一次实例启动或停止写入程序历史的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceChange {
    /// 为该实例打开了新的使用会话
    SessionOpened,
    /// 实例加入了进行中的使用会话
    InstanceAdded,
    /// 实例结束，会话因其他实例仍保持打开
    InstanceEnded,
    /// 最后一个实例结束，使用会话关闭
    SessionClosed,
    /// 该 pid 在当前会话中仍然活跃
    DuplicateStart,
    /// 没有打开的使用会话时收到停止
    NotRunning,
    /// 当前会话中没有该 pid 的活跃实例
    UnknownInstance,
}

/// 被监控使用情况的程序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// 程序名，唯一标识
    pub exe_name: String,
    /// 尽力获取的可读描述
    pub description: String,
    /// 可执行文件路径
    pub path: String,
    /// 首次记录时的进程 PID
    pub initial_pid: u32,
    /// 最后一个使用会话是否仍然活跃
    running: bool,
    /// 使用会话，只追加
    sessions: Vec<UsageSession>,
}

impl Program {
    /// 创建程序，并打开第一个使用会话
    pub fn new(
        exe_name: impl Into<String>,
        description: impl Into<String>,
        path: impl Into<String>,
        pid: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            exe_name: exe_name.into(),
            description: description.into(),
            path: path.into(),
            initial_pid: pid,
            running: true,
            sessions: vec![UsageSession::new(pid, started_at)],
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn sessions(&self) -> &[UsageSession] {
        &self.sessions
    }

    pub fn total_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn current_session(&self) -> Option<&UsageSession> {
        self.sessions.last().filter(|s| s.is_active())
    }

    /// 所有已关闭使用会话的时长之和
    pub fn total_run_time(&self) -> TimeDelta {
        self.sessions
            .iter()
            .filter_map(|s| s.duration())
            .fold(TimeDelta::zero(), |total, d| total + d)
    }

    /// 记录新实例：加入打开的使用会话，或者打开新会话
    pub fn register_instance(&mut self, pid: u32, started_at: DateTime<Utc>) -> InstanceChange {
        if self.running {
            if let Some(session) = self.sessions.last_mut() {
                if session.add_instance(pid, started_at) {
                    return InstanceChange::InstanceAdded;
                }
                return InstanceChange::DuplicateStart;
            }
        }

        self.sessions.push(UsageSession::new(pid, started_at));
        self.running = true;
        InstanceChange::SessionOpened
    }

    /// 记录实例结束，没有剩余实例时关闭使用会话
    pub fn end_instance(&mut self, pid: u32, ended_at: DateTime<Utc>) -> InstanceChange {
        if !self.running {
            return InstanceChange::NotRunning;
        }
        let Some(session) = self.sessions.last_mut() else {
            return InstanceChange::NotRunning;
        };

        match session.end_instance(pid, ended_at) {
            None => InstanceChange::UnknownInstance,
            Some(false) => InstanceChange::InstanceEnded,
            Some(true) => {
                self.running = false;
                InstanceChange::SessionClosed
            }
        }
    }

    /// 在 `at` 关闭打开的使用会话，不论其中有哪些实例
    ///
    /// 返回是否有打开的会话
    pub fn end_all_instances(&mut self, at: DateTime<Utc>) -> bool {
        if !self.running {
            return false;
        }
        if let Some(session) = self.sessions.last_mut() {
            session.end_all_instances(at);
        }
        self.running = false;
        true
    }

    /// 从检查点加载后重新计算计数
    ///
    /// 保存的运行标记保持不变，以便检测遗留会话。
    pub(crate) fn normalize(&mut self) {
        for session in self.sessions.iter_mut() {
            session.recount();
        }
        let last_active = self.sessions.last().is_some_and(|s| s.is_active());
        if last_active && !self.running {
            log::warn!(
                "{} has an open session but was stored as not running, marking it running",
                self.exe_name
            );
        }
        self.running = self.running || last_active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn assert_running_matches_last_session(program: &Program) {
        let last_active = program.sessions().last().is_some_and(|s| s.is_active());
        assert_eq!(program.is_running(), last_active);
        let open = program.sessions().iter().filter(|s| s.is_active()).count();
        assert!(open <= 1);
    }

    #[test]
    fn test_new_program_is_running() {
        let program = Program::new("app.exe", "App", "/usr/bin/app", 10, t(0));
        assert!(program.is_running());
        assert_eq!(program.total_sessions(), 1);
        assert_eq!(program.initial_pid, 10);
        assert_eq!(program.total_run_time(), TimeDelta::zero());
        assert_running_matches_last_session(&program);
    }

    #[test]
    fn test_register_then_end_round_trip() {
        let mut program = Program::new("app.exe", "App", "/usr/bin/app", 10, t(0));
        assert_eq!(program.end_instance(10, t(7)), InstanceChange::SessionClosed);
        assert!(!program.is_running());

        assert_eq!(program.register_instance(12, t(20)), InstanceChange::SessionOpened);
        assert_eq!(program.end_instance(12, t(25)), InstanceChange::SessionClosed);

        assert_eq!(program.total_sessions(), 2);
        assert_eq!(program.sessions()[1].duration(), Some(TimeDelta::seconds(5)));
        assert_eq!(program.total_run_time(), TimeDelta::seconds(12));
        assert_running_matches_last_session(&program);
    }

    #[test]
    fn test_overlapping_instances_are_not_double_counted() {
        let mut program = Program::new("app.exe", "App", "/usr/bin/app", 10, t(0));
        assert_eq!(program.register_instance(11, t(5)), InstanceChange::InstanceAdded);
        assert_eq!(program.end_instance(10, t(10)), InstanceChange::InstanceEnded);
        assert!(program.is_running());
        assert_eq!(program.end_instance(11, t(20)), InstanceChange::SessionClosed);

        assert_eq!(program.total_sessions(), 1);
        assert_eq!(program.total_run_time(), TimeDelta::seconds(20));
        assert_running_matches_last_session(&program);
    }

    #[test]
    fn test_total_run_time_ignores_active_session() {
        let mut program = Program::new("app.exe", "App", "/usr/bin/app", 10, t(0));
        program.end_instance(10, t(30));
        program.register_instance(11, t(40));
        assert_eq!(program.total_run_time(), TimeDelta::seconds(30));
    }

    #[test]
    fn test_anomalies_leave_state_unchanged() {
        let mut program = Program::new("app.exe", "App", "/usr/bin/app", 10, t(0));
        let before = program.clone();

        assert_eq!(program.register_instance(10, t(1)), InstanceChange::DuplicateStart);
        assert_eq!(program.end_instance(99, t(2)), InstanceChange::UnknownInstance);
        assert_eq!(program, before);

        program.end_instance(10, t(3));
        let closed = program.clone();
        assert_eq!(program.end_instance(10, t(4)), InstanceChange::NotRunning);
        assert_eq!(program, closed);
    }

    #[test]
    fn test_end_all_instances() {
        let mut program = Program::new("app.exe", "App", "/usr/bin/app", 10, t(0));
        program.register_instance(11, t(1));
        assert!(program.end_all_instances(t(50)));
        assert!(!program.is_running());
        assert_eq!(program.total_run_time(), TimeDelta::seconds(50));
        assert!(!program.end_all_instances(t(60)));
        assert_running_matches_last_session(&program);
    }

    #[test]
    fn test_normalize_closes_dangling_session() {
        let mut program: Program = serde_json::from_value(serde_json::json!({
            "exe_name": "app.exe",
            "description": "App",
            "path": "/usr/bin/app",
            "initial_pid": 10,
            "running": true,
            "sessions": [{
                "started_at": t(0),
                "ended_at": null,
                "instances": [{ "pid": 10, "started_at": t(0), "ended_at": t(7) }]
            }]
        }))
        .unwrap();
        program.normalize();

        assert_eq!(program.sessions()[0].ended_at, Some(t(7)));
        assert!(program.current_session().is_none());
        // 保存的运行标记保留，交给启动时的遗留会话检查处理
        assert!(program.is_running());
        assert!(program.end_all_instances(t(100)));
        assert!(!program.is_running());
        assert_eq!(program.total_run_time(), TimeDelta::seconds(7));
    }
}
