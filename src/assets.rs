//! 模型资源落地 - 只读打包资源 → 可写路径, 首次使用时复制一次
//!
//! 以目标路径为键: 目标已存在即视为已落地, 不比较内容。

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::info;

use crate::error::ProvisionError;

/// 进程级锁, 并发调用只复制一次
static PROVISION_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub path: PathBuf,
    pub copied: bool, // 本次是否实际复制
}

/// 默认模型目录 (平台缓存目录下)
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("yolo-overlay")
        .join("models")
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// 把 `source` (本地路径或 http(s) URL) 落地到 `dest`; 目标已存在时不做任何事
pub fn provision_asset(source: &str, dest: &Path) -> Result<Provisioned, ProvisionError> {
    let _guard = PROVISION_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if dest.exists() {
        return Ok(Provisioned {
            path: dest.to_path_buf(),
            copied: false,
        });
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let part = part_path(dest);
    let result = if is_url(source) {
        download(source, &part)
    } else {
        copy_local(Path::new(source), &part)
    };
    if let Err(e) = result {
        let _ = fs::remove_file(&part);
        return Err(e);
    }
    fs::rename(&part, dest)?;

    info!("📦 模型资源已落地: {} → {}", source, dest.display());
    Ok(Provisioned {
        path: dest.to_path_buf(),
        copied: true,
    })
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn copy_local(source: &Path, part: &Path) -> Result<(), ProvisionError> {
    if !source.is_file() {
        return Err(ProvisionError::SourceMissing(source.to_path_buf()));
    }
    fs::copy(source, part)?;
    File::open(part)?.sync_all()?;
    Ok(())
}

fn download(url: &str, part: &Path) -> Result<(), ProvisionError> {
    info!("⬇️ 下载模型: {}", url);
    let response = ureq::get(url).call().map_err(|e| ProvisionError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let mut reader = response.into_reader();
    let mut writer = BufWriter::new(File::create(part)?);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}
