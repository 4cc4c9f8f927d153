use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// 单个进程的一次连续运行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSession {
    /// 进程 PID（会被操作系统复用）
    pub pid: u32,
    /// 进程开始运行的时间
    pub started_at: DateTime<Utc>,
    /// 进程退出的时间，运行中为空
    pub ended_at: Option<DateTime<Utc>>,
}

impl InstanceSession {
    pub fn new(pid: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            pid,
            started_at,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// 实例运行中时为空
    pub fn duration(&self) -> Option<TimeDelta> {
        self.ended_at.map(|end| end - self.started_at)
    }

    /// 结束实例，只生效一次，之后的调用被忽略
    ///
    /// 返回本次调用是否生效
    fn end(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.ended_at = Some(clamp_end(self.started_at, at));
        true
    }
}

/// 同一程序的一个或多个重叠实例，合并成一段使用时间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSession {
    /// 第一个实例的启动时间
    pub started_at: DateTime<Utc>,
    /// 最后一个活跃实例结束时设置
    pub ended_at: Option<DateTime<Utc>>,
    /// 按到达顺序排列的实例
    instances: Vec<InstanceSession>,
    #[serde(default)]
    active_instances: usize,
}

impl UsageSession {
    /// 使用会话总是随第一个实例开始
    pub fn new(pid: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            ended_at: None,
            instances: vec![InstanceSession::new(pid, started_at)],
            active_instances: 1,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_instances > 0
    }

    pub fn active_instances(&self) -> usize {
        self.active_instances
    }

    pub fn instances(&self) -> &[InstanceSession] {
        &self.instances
    }

    /// 会话活跃时为空
    pub fn duration(&self) -> Option<TimeDelta> {
        self.ended_at.map(|end| end - self.started_at)
    }

    pub fn has_active_instance(&self, pid: u32) -> bool {
        self.instances.iter().any(|i| i.is_active() && i.pid == pid)
    }

    /// 向活跃会话追加新实例
    ///
    /// 同一 pid 的实例仍然活跃（之前的实例从未结束）时返回 false，不做修改。
    pub fn add_instance(&mut self, pid: u32, started_at: DateTime<Utc>) -> bool {
        if !self.is_active() || self.has_active_instance(pid) {
            return false;
        }
        self.instances.push(InstanceSession::new(pid, started_at));
        self.active_instances += 1;
        true
    }

    /// 结束指定 pid 的活跃实例，最后一个实例结束时关闭会话
    ///
    /// 没有该活跃实例时返回 `None`，否则返回会话是否关闭
    pub fn end_instance(&mut self, pid: u32, at: DateTime<Utc>) -> Option<bool> {
        let instance = self
            .instances
            .iter_mut()
            .find(|i| i.is_active() && i.pid == pid)?;
        instance.end(at);
        let ended_at = instance.ended_at;
        self.active_instances -= 1;

        if self.active_instances == 0 {
            self.close(ended_at.unwrap_or(at));
            return Some(true);
        }
        Some(false)
    }

    /// 强制关闭：所有活跃实例都在 `at` 结束
    pub fn end_all_instances(&mut self, at: DateTime<Utc>) {
        if !self.is_active() {
            return;
        }
        for instance in self.instances.iter_mut() {
            instance.end(at);
        }
        self.close(at);
    }

    fn close(&mut self, at: DateTime<Utc>) {
        self.ended_at = Some(clamp_end(self.started_at, at));
        self.active_instances = 0;
    }

    /// 反序列化后重新统计活跃实例
    ///
    /// 没有活跃实例却未结束的会话，在最后一个实例结束时关闭。
    pub(crate) fn recount(&mut self) {
        self.active_instances = self.instances.iter().filter(|i| i.is_active()).count();
        if self.active_instances == 0 && self.ended_at.is_none() {
            let last_end = self
                .instances
                .iter()
                .filter_map(|i| i.ended_at)
                .max()
                .unwrap_or(self.started_at);
            log::warn!(
                "Stored session started at {} has no active instance, closing it at {}",
                self.started_at,
                last_end
            );
            self.close(last_end);
        }
    }
}

fn clamp_end(start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
    if end < start {
        log::warn!("End time {} precedes start time {}, clamping to start", end, start);
        return start;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_new_session_has_one_active_instance() {
        let session = UsageSession::new(10, t(0));
        assert!(session.is_active());
        assert_eq!(session.active_instances(), 1);
        assert_eq!(session.instances().len(), 1);
        assert_eq!(session.duration(), None);
    }

    #[test]
    fn test_overlapping_instances_close_at_last_end() {
        let mut session = UsageSession::new(10, t(0));
        assert!(session.add_instance(11, t(5)));

        assert_eq!(session.end_instance(10, t(10)), Some(false));
        assert!(session.is_active());

        assert_eq!(session.end_instance(11, t(20)), Some(true));
        assert!(!session.is_active());
        assert_eq!(session.ended_at, Some(t(20)));
        assert_eq!(session.duration(), Some(TimeDelta::seconds(20)));
        assert_eq!(session.started_at, t(0));
    }

    #[test]
    fn test_duplicate_active_pid_is_rejected() {
        let mut session = UsageSession::new(10, t(0));
        assert!(!session.add_instance(10, t(3)));
        assert_eq!(session.instances().len(), 1);
        assert_eq!(session.active_instances(), 1);
    }

    #[test]
    fn test_pid_can_return_after_its_instance_ended() {
        let mut session = UsageSession::new(10, t(0));
        session.add_instance(11, t(1));
        session.end_instance(10, t(2));
        assert!(session.add_instance(10, t(3)));
        assert_eq!(session.active_instances(), 2);
    }

    #[test]
    fn test_end_unknown_pid_is_noop() {
        let mut session = UsageSession::new(10, t(0));
        assert_eq!(session.end_instance(99, t(4)), None);
        assert!(session.is_active());
        assert!(session.instances()[0].is_active());
    }

    #[test]
    fn test_end_all_instances_uses_forced_time() {
        let mut session = UsageSession::new(10, t(0));
        session.add_instance(11, t(2));
        session.end_all_instances(t(30));

        assert!(!session.is_active());
        assert_eq!(session.ended_at, Some(t(30)));
        assert!(session
            .instances()
            .iter()
            .all(|i| i.ended_at == Some(t(30))));
    }

    #[test]
    fn test_end_before_start_is_clamped() {
        let mut session = UsageSession::new(10, t(10));
        session.end_instance(10, t(5));
        assert_eq!(session.ended_at, Some(t(10)));
        assert_eq!(session.duration(), Some(TimeDelta::zero()));
        assert_eq!(session.instances()[0].duration(), Some(TimeDelta::zero()));
    }

    #[test]
    fn test_closed_session_is_immutable() {
        let mut session = UsageSession::new(10, t(0));
        session.end_instance(10, t(1));
        assert!(!session.add_instance(12, t(2)));
        session.end_all_instances(t(9));
        assert_eq!(session.ended_at, Some(t(1)));
    }

    #[test]
    fn test_recount_closes_session_without_active_instances() {
        let mut session: UsageSession = serde_json::from_value(serde_json::json!({
            "started_at": t(0),
            "ended_at": null,
            "instances": [
                { "pid": 1, "started_at": t(0), "ended_at": t(8) },
                { "pid": 2, "started_at": t(2), "ended_at": t(5) }
            ]
        }))
        .unwrap();
        session.recount();

        assert!(!session.is_active());
        assert_eq!(session.ended_at, Some(t(8)));
        session.end_all_instances(t(50));
        assert_eq!(session.ended_at, Some(t(8)));
    }
}
