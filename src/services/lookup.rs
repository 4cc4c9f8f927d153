use crate::models::SnapshotEntry;
use std::path::PathBuf;
use thiserror::Error;

/// 对操作系统或文件系统的尽力查询失败
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no running process {name} with pid {pid}")]
    NoMatch { name: String, pid: u32 },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no description available for {}", path.display())]
    NoDescription { path: PathBuf },
}

/// 列出当前所有运行中的进程
pub trait ProcessSnapshotProvider: Send + Sync {
    fn running_processes(&self) -> Vec<SnapshotEntry>;
}

/// 单个进程的补充查询，启动事件涉及未见过的程序时使用
pub trait ProcessLookup: Send + Sync {
    fn find_process(&self, name: &str, pid: u32) -> Result<SnapshotEntry, LookupError>;
}

/// 为可执行文件路径生成可读描述
pub trait DescriptionResolver: Send + Sync {
    fn describe(&self, path: &str) -> Result<String, LookupError>;
}
