use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// 不要求文件存在的绝对路径
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// 某个输出文件专属的临时目录：`<temp_root>/<sha256(绝对路径)>`，
/// 同一目标的多次下载会复用同一个目录，从而可以断点续传
pub fn temp_dir_for(temp_root: &Path, output: &Path) -> io::Result<PathBuf> {
    let abs = absolute_path(output)?;
    let digest = Sha256::digest(abs.to_string_lossy().as_bytes());
    Ok(temp_root.join(hex::encode(digest)))
}

/// 从URL路径中取最后一个非空片段作为文件名，取不到时使用 `download`
pub fn file_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(|s| s.to_string()))
        })
        .unwrap_or_else(|| "download".to_string())
}

/// 计算最终输出路径：未指定文件名时从URL推断；相对路径拼接到输出目录
pub fn resolve_output_path(file_name: Option<&str>, output_dir: &Path, url: &str) -> PathBuf {
    let name = match file_name {
        Some(name) if !name.is_empty() => PathBuf::from(name),
        _ => PathBuf::from(file_name_from_url(url)),
    };
    if name.is_absolute() || output_dir.as_os_str().is_empty() {
        name
    } else {
        output_dir.join(name)
    }
}
