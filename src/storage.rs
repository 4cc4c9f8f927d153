use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::Program;
use crate::state::{AppState, RegistrySnapshot};

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    version: u32,
    saved_at: DateTime<Utc>,
    programs: Vec<Program>,
}

/// 读取上一次运行保存的程序记录，文件不存在时视为空历史
pub fn load_programs(path: &Path) -> anyhow::Result<Vec<Program>> {
    if !path.exists() {
        log::info!("No checkpoint at {}, starting with an empty history", path.display());
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    let checkpoint: Checkpoint = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;

    if checkpoint.version != CHECKPOINT_VERSION {
        anyhow::bail!(
            "Unsupported checkpoint version {} in {}",
            checkpoint.version,
            path.display()
        );
    }

    let mut programs = checkpoint.programs;
    for program in programs.iter_mut() {
        program.normalize();
    }
    log::info!(
        "Loaded {} programs from checkpoint saved at {}",
        programs.len(),
        checkpoint.saved_at
    );
    Ok(programs)
}

/// 原子写入快照：先写同目录下的临时文件，再 rename 覆盖目标文件
pub fn save_programs(path: &Path, snapshot: &RegistrySnapshot) -> anyhow::Result<()> {
    let checkpoint = Checkpoint {
        version: CHECKPOINT_VERSION,
        saved_at: Utc::now(),
        programs: snapshot.iter().cloned().collect(),
    };
    let json = serde_json::to_string_pretty(&checkpoint).context("Failed to serialize checkpoint")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;

    log::debug!("Saved {} programs to {}", snapshot.len(), path.display());
    Ok(())
}

/// 运行期间定期写检查点，直到 `shutdown` 变为 true
///
/// 检查点保留仍在运行的会话，异常退出后下次启动可以据此关闭遗留会话。
pub fn spawn_checkpointer(
    path: PathBuf,
    state: AppState,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        log::info!("Checkpoint writer started (every {:?})", interval);
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

            let snapshot = state.snapshot();
            let target = path.clone();
            match tokio::task::spawn_blocking(move || save_programs(&target, &snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Checkpoint failed: {:#}", e),
                Err(e) => log::error!("Checkpoint task failed: {}", e),
            }
        }
        log::info!("Checkpoint writer stopped");
    })
}
