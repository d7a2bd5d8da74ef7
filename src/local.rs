//! 本地文件系统操作（下载目标与上传源）

use crate::error::{BackgroundError, Result};
use crate::model::{EntryType, PathAttributes, Permission};
use crate::session::ByteStream;
use futures::{StreamExt, TryStreamExt};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// 本地读取分块大小
const READ_CHUNK_SIZE: usize = 256 * 1024;

/// 目录项
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryType,
    pub attributes: PathAttributes,
    /// 符号链接指向（已解析为绝对路径）
    pub symlink_target: Option<PathBuf>,
}

fn to_attributes(metadata: &std::fs::Metadata) -> PathAttributes {
    let timestamp = |t: std::io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
    };
    PathAttributes {
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        modified: timestamp(metadata.modified()),
        created: timestamp(metadata.created()),
        permission: permission_of(metadata),
        ..Default::default()
    }
}

#[cfg(unix)]
fn permission_of(metadata: &std::fs::Metadata) -> Option<Permission> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permission(metadata.permissions().mode()))
}

#[cfg(not(unix))]
fn permission_of(_metadata: &std::fs::Metadata) -> Option<Permission> {
    None
}

fn kind_of(metadata: &std::fs::Metadata) -> EntryType {
    if metadata.is_dir() {
        EntryType::DIRECTORY
    } else {
        EntryType::FILE
    }
}

/// 文件属性（跟随符号链接），不存在返回 `None`
pub async fn attributes(path: &Path) -> Result<Option<PathAttributes>> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(Some(to_attributes(&metadata))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn kind(path: &Path) -> Result<Option<EntryType>> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(Some(kind_of(&metadata))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

/// 列出目录的直接子项，符号链接不跟随
pub async fn list(directory: &Path) -> Result<Vec<LocalEntry>> {
    let mut entries = Vec::new();
    let mut dir = fs::read_dir(directory).await?;
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let metadata = fs::symlink_metadata(&path).await?;

        if metadata.file_type().is_symlink() {
            let link = fs::read_link(&path).await?;
            let target = if link.is_absolute() {
                link
            } else {
                directory.join(link)
            };
            // 悬空链接按文件处理
            let (kind, attributes) = match fs::metadata(&path).await {
                Ok(resolved) => (kind_of(&resolved), to_attributes(&resolved)),
                Err(_) => (EntryType::FILE, PathAttributes::default()),
            };
            entries.push(LocalEntry {
                name,
                path,
                kind: kind | EntryType::SYMBOLIC_LINK,
                attributes,
                symlink_target: Some(target),
            });
            continue;
        }

        entries.push(LocalEntry {
            name,
            path,
            kind: kind_of(&metadata),
            attributes: to_attributes(&metadata),
            symlink_target: None,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// 从 `offset` 开始流式读取
pub async fn read(path: &Path, offset: u64) -> Result<ByteStream> {
    let mut file = fs::File::open(path).await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    let stream = ReaderStream::with_capacity(file, READ_CHUNK_SIZE).map_err(BackgroundError::from);
    Ok(Box::pin(stream))
}

/// 写入数据流，`append` 为真时追加到已有内容之后
pub async fn write(path: &Path, mut data: ByteStream, append: bool) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut options = fs::OpenOptions::new();
    options.create(true).write(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    let mut file = options.open(path).await?;

    let mut written = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

pub async fn mkdir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    Ok(())
}

pub async fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).await?;
    Ok(())
}

pub async fn delete(path: &Path) -> Result<()> {
    if fs::metadata(path).await?.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(())
}

#[cfg(unix)]
pub async fn symlink(link: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).await?;
    }
    if fs::symlink_metadata(link).await.is_ok() {
        fs::remove_file(link).await?;
    }
    fs::symlink(target, link).await?;
    Ok(())
}

#[cfg(not(unix))]
pub async fn symlink(_link: &Path, _target: &Path) -> Result<()> {
    Err(BackgroundError::Unsupported("symlink".into()))
}

/// 设置修改时间（Unix 时间戳，秒）
pub async fn set_timestamp(path: &Path, modified: i64) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(modified, 0))
    })
    .await
    .map_err(|e| BackgroundError::Io(e.to_string()))??;
    Ok(())
}

#[cfg(unix)]
pub async fn set_permission(path: &Path, permission: Permission) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(permission.mode())).await?;
    Ok(())
}

#[cfg(not(unix))]
pub async fn set_permission(_path: &Path, _permission: Permission) -> Result<()> {
    Err(BackgroundError::Unsupported("permission".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn stream_of(chunks: &[&'static [u8]]) -> ByteStream {
        let items: Vec<Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        Box::pin(futures::stream::iter(items))
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_write_append_and_read_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.bin");

        assert_eq!(write(&path, stream_of(&[b"hello"]), false).await.unwrap(), 5);
        write(&path, stream_of(&[b" ", b"world"]), true).await.unwrap();

        assert_eq!(collect(read(&path, 0).await.unwrap()).await, b"hello world");
        assert_eq!(collect(read(&path, 6).await.unwrap()).await, b"world");

        write(&path, stream_of(&[b"x"]), false).await.unwrap();
        assert_eq!(attributes(&path).await.unwrap().unwrap().size, 1);
    }

    #[tokio::test]
    async fn test_timestamp_and_missing_attributes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();

        set_timestamp(&path, 1_600_000_000).await.unwrap();
        let attrs = attributes(&path).await.unwrap().unwrap();
        assert_eq!(attrs.modified, Some(1_600_000_000));

        assert!(attributes(&dir.path().join("missing")).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_reports_symlinks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("real.txt"), b"abc").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt")).unwrap();

        let entries = list(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
        let link = entries.iter().find(|e| e.name == "link.txt").unwrap();
        assert!(link.kind.is_symlink());
        assert!(link.kind.is_file());
        assert_eq!(link.symlink_target.as_deref(), Some(dir.path().join("real.txt").as_path()));
    }
}
