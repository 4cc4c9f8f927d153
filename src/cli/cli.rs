use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Activity Monitor - 记录每个程序的使用时长
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 监听端口
    #[arg(short, long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// 监听地址
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// 进程表轮询间隔（毫秒）
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 1000,
          value_parser = clap::value_parser!(u64).range(10..))]
    pub poll_interval_ms: u64,

    /// 历史记录的 JSON 检查点，启动时加载，运行中定期写入，退出时保存
    #[arg(long, env = "STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// 运行中写检查点的间隔（秒）
    #[arg(long, env = "CHECKPOINT_INTERVAL_SECS", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub checkpoint_interval_secs: u64,

    /// 只跟踪名称匹配的程序（正则表达式，无效时按字符串包含匹配）
    #[arg(long, env = "INCLUDE")]
    pub include: Option<String>,

    /// 不跟踪名称匹配的程序（正则表达式，无效时按字符串包含匹配）
    #[arg(long, env = "EXCLUDE")]
    pub exclude: Option<String>,
}

impl CommandArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}
