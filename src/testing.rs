//! 测试用的内存协议实现

use crate::error::{BackgroundError, ConnectionErrorKind, Result};
use crate::model::{AttributedList, Credentials, EntryType, Host, Path, PathAttributes, Protocol};
use crate::session::feature::{
    AttributesFinder, Copier, Deleter, DirectoryMaker, Finder, Lister, Mover, Reader, Writer,
};
use crate::session::{
    ByteStream, Capability, ConnectionEvent, ConnectionListener, Feature, HostKeyCallback,
    ListProgressListener, SessionBackend,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const MODIFIED: i64 = 1_700_000_000;

pub fn local_host() -> Host {
    Host::new(Protocol::Local, "localhost")
}

#[derive(Clone)]
enum Node {
    Directory,
    File(Vec<u8>),
    Link(String),
}

type ListHook = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Default)]
struct Store {
    nodes: Mutex<BTreeMap<String, Node>>,
    list_delay: Mutex<Option<Duration>>,
    list_counts: Mutex<HashMap<String, usize>>,
    on_list: Mutex<Option<ListHook>>,
    fail_reads: Mutex<HashSet<String>>,
    find_count: AtomicUsize,
    copy_count: AtomicUsize,
    no_append: AtomicBool,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl Store {
    fn nodes(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Node>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, path: &str, node: Node) {
        let mut nodes = self.nodes();
        let mut ancestor = parent_of(path);
        while ancestor != "/" {
            nodes.entry(ancestor.to_string()).or_insert(Node::Directory);
            ancestor = parent_of(ancestor);
        }
        nodes.insert(path.to_string(), node);
    }

    fn resolve(&self, path: &str) -> Option<Node> {
        let nodes = self.nodes();
        match nodes.get(path)? {
            Node::Link(target) => nodes.get(target).cloned(),
            node => Some(node.clone()),
        }
    }

    fn describe(&self, parent: &Path, path: &str, node: &Node) -> Path {
        let name = name_of(path);
        match node {
            Node::Directory => parent.child(name, EntryType::DIRECTORY),
            Node::File(data) => parent.child(name, EntryType::FILE).with_attributes(
                PathAttributes::default()
                    .with_size(data.len() as u64)
                    .with_modified(MODIFIED),
            ),
            Node::Link(target) => {
                let resolved = match self.resolve(path) {
                    Some(Node::Directory) => parent.child(name, EntryType::DIRECTORY),
                    Some(Node::File(data)) => parent.child(name, EntryType::FILE).with_attributes(
                        PathAttributes::default()
                            .with_size(data.len() as u64)
                            .with_modified(MODIFIED),
                    ),
                    _ => parent.child(name, EntryType::FILE),
                };
                resolved.with_symlink_target(target.clone())
            }
        }
    }

    fn subtree(&self, path: &str) -> Vec<(String, Node)> {
        let prefix = format!("{}/", path);
        self.nodes()
            .iter()
            .filter(|(key, _)| key.as_str() == path || key.starts_with(&prefix))
            .map(|(key, node)| (key.clone(), node.clone()))
            .collect()
    }
}

#[async_trait]
impl Lister for Store {
    async fn list(
        &self,
        directory: &Path,
        listener: &dyn ListProgressListener,
    ) -> Result<AttributedList> {
        let key = directory.absolute();
        *self
            .list_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default() += 1;
        let hook = self.on_list.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook(directory);
        }
        let delay = *self.list_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if key != "/" && !matches!(self.resolve(&key), Some(Node::Directory)) {
            return Err(BackgroundError::NotFound(key));
        }
        let children: Vec<(String, Node)> = self
            .nodes()
            .iter()
            .filter(|(path, _)| path.as_str() != "/" && parent_of(path) == key)
            .map(|(path, node)| (path.clone(), node.clone()))
            .collect();
        let mut list = AttributedList::default();
        for (path, node) in &children {
            list.push(self.describe(directory, path, node));
        }
        match listener.chunk(directory, &list) {
            Ok(()) => Ok(list),
            Err(BackgroundError::Canceled) => {
                list.mark_truncated();
                Ok(list)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Reader for Store {
    async fn read(&self, file: &Path, offset: u64) -> Result<ByteStream> {
        let key = file.absolute();
        if self
            .fail_reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
        {
            return Err(BackgroundError::Transfer(format!("读取失败: {}", key)));
        }
        match self.resolve(&key) {
            Some(Node::File(data)) => {
                let start = (offset as usize).min(data.len());
                let chunks: Vec<Result<Bytes>> = data[start..]
                    .chunks(4)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
            _ => Err(BackgroundError::NotFound(key)),
        }
    }
}

#[async_trait]
impl Writer for Store {
    async fn write(&self, file: &Path, append: bool, mut data: ByteStream) -> Result<u64> {
        let key = file.absolute();
        let mut content = match (append, self.resolve(&key)) {
            (true, Some(Node::File(existing))) => existing,
            _ => Vec::new(),
        };
        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            content.extend_from_slice(&chunk);
        }
        self.insert(&key, Node::File(content));
        Ok(written)
    }

    fn append_supported(&self) -> bool {
        !self.no_append.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finder for Store {
    async fn find(&self, file: &Path) -> Result<bool> {
        self.find_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.nodes().contains_key(&file.absolute()))
    }
}

#[async_trait]
impl AttributesFinder for Store {
    async fn find(&self, file: &Path) -> Result<PathAttributes> {
        let key = file.absolute();
        match self.resolve(&key) {
            Some(Node::File(data)) => Ok(PathAttributes::default()
                .with_size(data.len() as u64)
                .with_modified(MODIFIED)),
            Some(_) => Ok(PathAttributes::default().with_modified(MODIFIED)),
            None => Err(BackgroundError::NotFound(key)),
        }
    }
}

#[async_trait]
impl Deleter for Store {
    async fn delete(&self, files: &[Path]) -> Result<()> {
        for file in files {
            let removed: Vec<String> = self.subtree(&file.absolute()).into_iter().map(|(k, _)| k).collect();
            let mut nodes = self.nodes();
            for key in removed {
                nodes.remove(&key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Copier for Store {
    async fn copy(&self, source: &Path, target: &Path) -> Result<()> {
        self.copy_count.fetch_add(1, Ordering::SeqCst);
        let from = source.absolute();
        let to = target.absolute();
        let subtree = self.subtree(&from);
        if subtree.is_empty() {
            return Err(BackgroundError::NotFound(from));
        }
        for (key, node) in subtree {
            self.insert(&format!("{}{}", to, &key[from.len()..]), node);
        }
        Ok(())
    }
}

#[async_trait]
impl Mover for Store {
    async fn rename(&self, source: &Path, target: &Path) -> Result<()> {
        let from = source.absolute();
        let to = target.absolute();
        let subtree = self.subtree(&from);
        if subtree.is_empty() {
            return Err(BackgroundError::NotFound(from));
        }
        {
            let mut nodes = self.nodes();
            for (key, _) in &subtree {
                nodes.remove(key);
            }
        }
        for (key, node) in subtree {
            self.insert(&format!("{}{}", to, &key[from.len()..]), node);
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryMaker for Store {
    async fn mkdir(&self, directory: &Path) -> Result<()> {
        self.insert(&directory.absolute(), Node::Directory);
        Ok(())
    }
}

/// 内存协议：记录列表与查找调用次数，可注入失败
#[derive(Default)]
pub struct MemoryBackend {
    store: Arc<Store>,
    fail_login: AtomicBool,
    fail_logout: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.store.insert(path, Node::File(data.to_vec()));
    }

    pub fn add_dir(&self, path: &str) {
        self.store.insert(path, Node::Directory);
    }

    pub fn add_symlink(&self, path: &str, target: &str) {
        self.store.insert(path, Node::Link(target.to_string()));
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        match self.store.nodes().get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.store.nodes().contains_key(path)
    }

    pub fn fail_login(&self) {
        self.fail_login.store(true, Ordering::SeqCst);
    }

    pub fn fail_logout(&self) {
        self.fail_logout.store(true, Ordering::SeqCst);
    }

    pub fn fail_read(&self, path: &str) {
        self.store
            .fail_reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string());
    }

    pub fn disable_append(&self) {
        self.store.no_append.store(true, Ordering::SeqCst);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self
            .store
            .list_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// 每次列表前调用
    pub fn on_list(&self, hook: impl Fn(&Path) + Send + Sync + 'static) {
        *self.store.on_list.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn list_count(&self, directory: &Path) -> usize {
        self.store
            .list_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&directory.absolute())
            .copied()
            .unwrap_or(0)
    }

    pub fn find_count(&self) -> usize {
        self.store.find_count.load(Ordering::SeqCst)
    }

    pub fn copy_count(&self) -> usize {
        self.store.copy_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn connect(&self, _host: &Host, _key: &dyn HostKeyCallback) -> Result<()> {
        Ok(())
    }

    async fn login(
        &self,
        _host: &Host,
        credentials: &Credentials,
        _cancel: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<()> {
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(BackgroundError::LoginFailure(credentials.username.clone()));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(BackgroundError::connection(ConnectionErrorKind::Other, "logout"));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn feature(&self, feature: Feature) -> Option<Capability> {
        let store = self.store.clone();
        Some(match feature {
            Feature::Read => Capability::Read(store),
            Feature::Write => Capability::Write(store),
            Feature::List => Capability::List(store),
            Feature::Find => Capability::Find(store),
            Feature::Attributes => Capability::Attributes(store),
            Feature::Delete => Capability::Delete(store),
            Feature::Copy => Capability::Copy(store),
            Feature::Move => Capability::Move(store),
            Feature::Directory => Capability::Directory(store),
            Feature::Symlink | Feature::Timestamp | Feature::UnixPermission => return None,
        })
    }
}

#[derive(Default)]
pub struct RecordingConnectionListener {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingConnectionListener {
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConnectionListener for RecordingConnectionListener {
    fn on_event(&self, _host: &Host, event: ConnectionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
