use crate::models::Program;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// 已跟踪的程序集合，以程序名为键
///
/// 记录放在 `Arc` 中写时复制，快照只是浅拷贝，recorder 继续修改时快照仍然有效。
#[derive(Debug, Default)]
pub struct TrackedPrograms {
    index: HashMap<String, usize>,
    programs: Vec<Arc<Program>>,
}

impl TrackedPrograms {
    /// 仅当没有同名程序时才保存
    pub fn try_insert(&mut self, program: Program) -> bool {
        if self.contains(&program.exe_name) {
            return false;
        }
        self.index.insert(program.exe_name.clone(), self.programs.len());
        self.programs.push(Arc::new(program));
        true
    }

    pub fn lookup(&self, exe_name: &str) -> Option<Arc<Program>> {
        self.index.get(exe_name).map(|&i| self.programs[i].clone())
    }

    pub fn contains(&self, exe_name: &str) -> bool {
        self.index.contains_key(exe_name)
    }

    pub fn get_mut(&mut self, exe_name: &str) -> Option<&mut Program> {
        let i = *self.index.get(exe_name)?;
        Some(Arc::make_mut(&mut self.programs[i]))
    }

    /// 所有标记为运行中的程序的可变引用
    pub fn running_mut(&mut self) -> impl Iterator<Item = &mut Program> {
        self.programs
            .iter_mut()
            .filter(|p| p.is_running())
            .map(Arc::make_mut)
    }

    /// 所有记录的时间点副本，按插入顺序
    pub fn all_records(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            programs: self.programs.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }
}

/// 注册表在某一时刻的只读视图，可重复遍历
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    programs: Vec<Arc<Program>>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Program> {
        self.programs.iter().map(|p| p.as_ref())
    }

    #[cfg(test)]
    pub fn running(&self) -> impl Iterator<Item = &Program> {
        self.iter().filter(|p| p.is_running())
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }
}

/// 注册表的共享句柄
///
/// recorder 任务是唯一的写入方，读取方只在复制所需数据时持有锁。
#[derive(Debug, Clone, Default)]
pub struct AppState {
    programs: Arc<Mutex<TrackedPrograms>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.lock().all_records()
    }

    pub fn lookup(&self, exe_name: &str) -> Option<Arc<Program>> {
        self.lock().lookup(exe_name)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TrackedPrograms> {
        self.programs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn program(name: &str, pid: u32) -> Program {
        Program::new(name, "desc", format!("/usr/bin/{}", name), pid, Utc.timestamp_opt(0, 0).unwrap())
    }

    #[test]
    fn test_try_insert_rejects_duplicate_name() {
        let mut programs = TrackedPrograms::default();
        assert!(programs.try_insert(program("app", 1)));
        assert!(!programs.try_insert(program("app", 2)));
        assert_eq!(programs.len(), 1);
        assert_eq!(programs.lookup("app").unwrap().initial_pid, 1);
        assert!(programs.contains("app"));
        assert!(programs.lookup("other").is_none());
    }

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let mut programs = TrackedPrograms::default();
        for name in ["zsh", "bash", "vim"] {
            programs.try_insert(program(name, 1));
        }
        let names: Vec<_> = programs.all_records().iter().map(|p| p.exe_name.clone()).collect();
        assert_eq!(names, vec!["zsh", "bash", "vim"]);
    }

    #[test]
    fn test_snapshot_is_stable_under_mutation() {
        let mut programs = TrackedPrograms::default();
        programs.try_insert(program("app", 1));
        let snapshot = programs.all_records();

        let later = Utc.timestamp_opt(10, 0).unwrap();
        programs.get_mut("app").unwrap().end_instance(1, later);
        programs.try_insert(program("new", 2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.running().count(), 1);
        assert!(!programs.lookup("app").unwrap().is_running());

        // 重复遍历得到相同的记录
        let first: Vec<_> = snapshot.iter().cloned().collect();
        let second: Vec<_> = snapshot.iter().cloned().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_app_state_reads() {
        let state = AppState::new();
        state.lock().try_insert(program("app", 1));
        assert_eq!(state.snapshot().running().count(), 1);
        assert_eq!(state.lookup("app").unwrap().exe_name, "app");
    }
}
