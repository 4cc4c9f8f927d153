use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::{Mutex, MutexGuard};
use sysinfo::{Pid, Process, ProcessesToUpdate, System};

use crate::models::SnapshotEntry;
use crate::services::lookup::{LookupError, ProcessLookup, ProcessSnapshotProvider};

/// 程序名匹配规则：正则表达式，无法编译时退化为字符串包含匹配
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Regex(Regex),
    Substring(String),
}

impl NameMatcher {
    pub fn new(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(r) => NameMatcher::Regex(r),
            Err(e) => {
                log::warn!("Invalid pattern '{}' ({}), falling back to substring match", pattern, e);
                NameMatcher::Substring(pattern.to_string())
            }
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            NameMatcher::Regex(r) => r.is_match(name),
            NameMatcher::Substring(s) => name.contains(s.as_str()),
        }
    }
}

/// 决定哪些程序需要跟踪
#[derive(Debug, Clone, Default)]
pub struct ProcessFilter {
    include: Option<NameMatcher>,
    exclude: Option<NameMatcher>,
}

impl ProcessFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include: include.map(NameMatcher::new),
            exclude: exclude.map(NameMatcher::new),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(name) {
                return false;
            }
        }
        self.include.as_ref().map_or(true, |include| include.is_match(name))
    }
}

/// 基于 `sysinfo` 的进程表访问
pub struct SysinfoProvider {
    system: Mutex<System>,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, System> {
        self.system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSnapshotProvider for SysinfoProvider {
    fn running_processes(&self) -> Vec<SnapshotEntry> {
        let mut sys = self.lock();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let mut entries: Vec<SnapshotEntry> = sys
            .processes()
            .iter()
            // Linux 上线程也以 task 形式出现
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| to_entry(*pid, process))
            .collect();
        entries.sort_by_key(|e| (e.started_at, e.pid));
        entries
    }
}

impl ProcessLookup for SysinfoProvider {
    fn find_process(&self, name: &str, pid: u32) -> Result<SnapshotEntry, LookupError> {
        let no_match = || LookupError::NoMatch {
            name: name.to_string(),
            pid,
        };

        let mut sys = self.lock();
        let sysinfo_pid = Pid::from_u32(pid);
        sys.refresh_processes(ProcessesToUpdate::Some(&[sysinfo_pid]), true);

        let process = sys.process(sysinfo_pid).ok_or_else(no_match)?;
        let entry = to_entry(sysinfo_pid, process);
        if entry.name != name {
            log::debug!("pid {} now belongs to {}, not {}", pid, entry.name, name);
            return Err(no_match());
        }
        Ok(entry)
    }
}

fn to_entry(pid: Pid, process: &Process) -> SnapshotEntry {
    SnapshotEntry {
        name: process.name().to_string_lossy().into_owned(),
        path: process
            .exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        pid: pid.as_u32(),
        started_at: start_time(process.start_time()),
    }
}

/// sysinfo 的启动时间是 Unix 秒数
pub fn start_time(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    #[test]
    fn test_regex_matching() {
        let matcher = NameMatcher::new("^fire.*x$");
        assert!(matcher.is_match("firefox"));
        assert!(!matcher.is_match("firefox-bin"));
    }

    #[test]
    fn test_invalid_regex_falls_back_to_substring() {
        let matcher = NameMatcher::new("code(");
        assert!(matches!(matcher, NameMatcher::Substring(_)));
        assert!(matcher.is_match("vscode(x)"));
        assert!(!matcher.is_match("vscode"));
    }

    #[test]
    fn test_filter_exclude_wins() {
        let filter = ProcessFilter::new(Some("^(bash|zsh)$"), Some("zsh"));
        assert!(filter.allows("bash"));
        assert!(!filter.allows("zsh"));
        assert!(!filter.allows("fish"));
        assert!(ProcessFilter::default().allows("anything"));
    }

    #[test]
    fn test_find_current_process() {
        let provider = SysinfoProvider::new();
        let pid = process::id();
        let current = provider
            .running_processes()
            .into_iter()
            .find(|e| e.pid == pid)
            .expect("current process should be listed");

        let found = provider.find_process(&current.name, pid).unwrap();
        assert_eq!(found.pid, pid);
        assert!(matches!(
            provider.find_process("definitely-not-this-binary", pid),
            Err(LookupError::NoMatch { .. })
        ));
    }

    #[test]
    fn test_start_time_conversion() {
        assert_eq!(start_time(1_700_000_000).timestamp(), 1_700_000_000);
    }
}
