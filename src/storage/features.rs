use crate::error::{BackgroundError, Result};
use crate::model::{AttributedList, EntryType, Path, PathAttributes};
use crate::session::feature::{
    AttributesFinder, Copier, Deleter, DirectoryMaker, Finder, Lister, Mover, Reader, Writer,
};
use crate::session::{ByteStream, Capability, Feature, ListProgressListener};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use opendal::{Metadata, Metakey, Operator};
use std::sync::Arc;
use tracing::debug;

/// 每列出多少项回调一次
const LIST_CHUNK: usize = 100;

/// `Operator` 上的各项能力
pub struct OperatorFeatures {
    operator: Operator,
    chunk_size: usize,
}

/// opendal 路径：相对根目录，目录以 `/` 结尾
fn key(path: &Path) -> String {
    if path.is_root() {
        return "/".to_string();
    }
    let relative = path.absolute().trim_start_matches('/').to_string();
    if path.is_directory() {
        format!("{}/", relative)
    } else {
        relative
    }
}

fn to_attributes(metadata: &Metadata) -> PathAttributes {
    PathAttributes {
        size: if metadata.is_dir() { 0 } else { metadata.content_length() },
        modified: metadata.last_modified().map(|t| t.timestamp()),
        etag: metadata.etag().map(|s| s.trim_matches('"').to_string()),
        ..Default::default()
    }
}

impl OperatorFeatures {
    pub fn new(operator: Operator, chunk_size: usize) -> Self {
        Self {
            operator,
            chunk_size: chunk_size.max(1),
        }
    }

    /// 仅返回服务端支持的能力
    pub fn capability(self: Arc<Self>, feature: Feature) -> Option<Capability> {
        let supported = self.operator.info().full_capability();
        let capability = match feature {
            Feature::Read if supported.read => Capability::Read(self),
            Feature::Write if supported.write => Capability::Write(self),
            Feature::List if supported.list => Capability::List(self),
            Feature::Find if supported.stat => Capability::Find(self),
            Feature::Attributes if supported.stat => Capability::Attributes(self),
            Feature::Delete if supported.delete => Capability::Delete(self),
            Feature::Copy if supported.copy => Capability::Copy(self),
            Feature::Move if supported.rename => Capability::Move(self),
            Feature::Directory if supported.create_dir => Capability::Directory(self),
            _ => return None,
        };
        Some(capability)
    }

    async fn stat(&self, path: &Path) -> Result<Metadata> {
        Ok(self.operator.stat(&key(path)).await?)
    }
}

#[async_trait]
impl Lister for OperatorFeatures {
    async fn list(
        &self,
        directory: &Path,
        listener: &dyn ListProgressListener,
    ) -> Result<AttributedList> {
        let dir_key = key(directory);
        let mut lister = self
            .operator
            .lister_with(&dir_key)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode | Metakey::Etag)
            .await?;

        let mut list = AttributedList::default();
        let mut pending = 0;
        while let Some(entry) = lister.try_next().await? {
            // 列表结果包含目录自身
            if entry.path().trim_end_matches('/') == dir_key.trim_end_matches('/') {
                continue;
            }
            let name = entry.name().trim_end_matches('/');
            if name.is_empty() {
                continue;
            }
            let metadata = entry.metadata();
            let kind = if metadata.is_dir() {
                EntryType::DIRECTORY
            } else {
                EntryType::FILE
            };
            list.push(directory.child(name, kind).with_attributes(to_attributes(metadata)));

            pending += 1;
            if pending >= LIST_CHUNK {
                pending = 0;
                if let Err(e) = listener.chunk(directory, &list) {
                    return truncate(directory, list, e);
                }
            }
        }
        if let Err(e) = listener.chunk(directory, &list) {
            return truncate(directory, list, e);
        }
        Ok(list)
    }
}

/// 回调要求取消时返回已取得的部分
fn truncate(directory: &Path, mut list: AttributedList, error: BackgroundError) -> Result<AttributedList> {
    if !error.is_cancel() {
        return Err(error);
    }
    debug!("列表已取消，保留 {} 项: {}", list.len(), directory);
    list.mark_truncated();
    Ok(list)
}

#[async_trait]
impl Reader for OperatorFeatures {
    async fn read(&self, file: &Path, offset: u64) -> Result<ByteStream> {
        let path = key(file);
        let size = self.stat(file).await?.content_length();
        let operator = self.operator.clone();
        let chunk = self.chunk_size as u64;

        // 按分块做范围读取
        let stream = futures::stream::try_unfold(offset, move |position| {
            let operator = operator.clone();
            let path = path.clone();
            async move {
                if position >= size {
                    return Ok(None);
                }
                let end = (position + chunk).min(size);
                let buffer = operator.read_with(&path).range(position..end).await?;
                Ok::<_, BackgroundError>(Some((buffer.to_bytes(), end)))
            }
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Writer for OperatorFeatures {
    async fn write(&self, file: &Path, append: bool, mut data: ByteStream) -> Result<u64> {
        let mut writer = self
            .operator
            .writer_with(&key(file))
            .append(append)
            .chunk(self.chunk_size)
            .await?;
        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            writer.write(chunk).await?;
        }
        writer.close().await?;
        Ok(written)
    }

    fn append_supported(&self) -> bool {
        self.operator.info().full_capability().write_can_append
    }
}

#[async_trait]
impl Finder for OperatorFeatures {
    async fn find(&self, file: &Path) -> Result<bool> {
        match self.stat(file).await {
            Ok(_) => Ok(true),
            Err(BackgroundError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AttributesFinder for OperatorFeatures {
    async fn find(&self, file: &Path) -> Result<PathAttributes> {
        Ok(to_attributes(&self.stat(file).await?))
    }
}

#[async_trait]
impl Deleter for OperatorFeatures {
    async fn delete(&self, files: &[Path]) -> Result<()> {
        for file in files {
            if file.is_directory() {
                self.operator.remove_all(&key(file)).await?;
            } else {
                self.operator.delete(&key(file)).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Copier for OperatorFeatures {
    async fn copy(&self, source: &Path, target: &Path) -> Result<()> {
        Ok(self.operator.copy(&key(source), &key(target)).await?)
    }
}

#[async_trait]
impl Mover for OperatorFeatures {
    async fn rename(&self, source: &Path, target: &Path) -> Result<()> {
        Ok(self.operator.rename(&key(source), &key(target)).await?)
    }
}

#[async_trait]
impl DirectoryMaker for OperatorFeatures {
    async fn mkdir(&self, directory: &Path) -> Result<()> {
        Ok(self.operator.create_dir(&key(directory)).await?)
    }
}
