use std::collections::HashSet;

/// 新程序的启动事件，查询时进程已经退出
///
/// 保存 (name, pid)，对应的停止事件到达时可以识别出来，不作为异常上报。
/// 始终等不到停止的条目会一直保留，数量受进程更替速度限制。
#[derive(Debug, Default)]
pub struct UnresolvedStartBuffer {
    entries: HashSet<(String, u32)>,
}

impl UnresolvedStartBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, pid: u32) {
        self.entries.insert((name.to_string(), pid));
    }

    /// 移除条目，返回它是否存在
    pub fn take(&mut self, name: &str, pid: u32) -> bool {
        self.entries.remove(&(name.to_string(), pid))
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str, pid: u32) -> bool {
        self.entries.contains(&(name.to_string(), pid))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_matches_name_and_pid() {
        let mut buffer = UnresolvedStartBuffer::new();
        buffer.insert("new.exe", 5);

        assert!(!buffer.take("new.exe", 6));
        assert!(!buffer.take("other.exe", 5));
        assert!(buffer.contains("new.exe", 5));

        assert!(buffer.take("new.exe", 5));
        assert!(buffer.is_empty());
        assert!(!buffer.take("new.exe", 5));
    }
}
