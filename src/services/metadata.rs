use std::fs;
use std::path::{Path, PathBuf};

use crate::services::lookup::{DescriptionResolver, LookupError};

/// 用路径最终指向的二进制文件名描述程序
///
/// 例如 `/usr/bin/python3` 是符号链接时，描述为 `python3.12`
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDescriptionResolver;

impl DescriptionResolver for FileDescriptionResolver {
    fn describe(&self, path: &str) -> Result<String, LookupError> {
        if path.is_empty() {
            return Err(LookupError::NoDescription {
                path: PathBuf::new(),
            });
        }

        let io_error = |source| LookupError::Io {
            path: PathBuf::from(path),
            source,
        };
        let resolved = fs::canonicalize(path).map_err(io_error)?;
        let metadata = fs::metadata(&resolved).map_err(io_error)?;
        if !metadata.is_file() {
            return Err(LookupError::NoDescription { path: resolved });
        }

        file_name(&resolved).ok_or(LookupError::NoDescription { path: resolved.clone() })
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
