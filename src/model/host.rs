#![allow(non_snake_case)]

use serde::{Deserialize, Serialize};

/// 协议类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Local,
    S3,
    WebDav,
    Ftp,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Local => 0,
            Protocol::S3 => 443,
            Protocol::WebDav => 443,
            Protocol::Ftp => 21,
        }
    }

    /// 是否需要解析主机名
    pub fn is_remote(&self) -> bool {
        !matches!(self, Protocol::Local)
    }

    /// 是否需要密码登录
    pub fn requires_password(&self) -> bool {
        matches!(self, Protocol::S3 | Protocol::WebDav | Protocol::Ftp)
    }
}

/// 登录凭据
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() || self.username == "anonymous"
    }
}

/// 连接目标记录（书签持久化由外部负责）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub uuid: String,
    pub protocol: Protocol,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub credentials: Credentials,
    /// 远程根目录（S3 前缀、WebDAV 根、本地路径）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaultPath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

impl Host {
    pub fn new(protocol: Protocol, hostname: impl Into<String>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            protocol,
            hostname: hostname.into(),
            port: protocol.default_port(),
            credentials: Credentials::default(),
            defaultPath: None,
            bucket: None,
            region: None,
            nickname: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.defaultPath = Some(path.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 用于日志的名称
    pub fn display_name(&self) -> String {
        if let Some(nickname) = &self.nickname {
            return nickname.clone();
        }
        match self.protocol {
            Protocol::Local => format!("local:{}", self.defaultPath.as_deref().unwrap_or("/")),
            Protocol::S3 => format!(
                "s3://{}{}",
                self.bucket.as_deref().unwrap_or(&self.hostname),
                self.defaultPath
                    .as_deref()
                    .map(|p| format!("/{}", p.trim_start_matches('/')))
                    .unwrap_or_default()
            ),
            Protocol::WebDav => format!("webdav://{}:{}", self.hostname, self.port),
            Protocol::Ftp => format!("ftp://{}:{}", self.hostname, self.port),
        }
    }

    /// 用于解析的主机与端口
    ///
    /// 主机名可以写成 `http://127.0.0.1:9000/` 这样的地址，此时取其中的
    /// 主机部分，端口取地址中的端口或按协议的默认端口。
    pub fn authority(&self) -> (String, u16) {
        let Some((scheme, rest)) = self.hostname.split_once("://") else {
            return (self.hostname.clone(), self.port);
        };
        let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
        // 去掉 `user:pass@`
        let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        let default_port = match scheme.to_ascii_lowercase().as_str() {
            "http" => 80,
            "https" => 443,
            "ftp" => 21,
            _ => self.port,
        };
        if let Some(bracketed) = authority.strip_prefix('[') {
            if let Some((address, tail)) = bracketed.split_once(']') {
                let port = tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(default_port);
                return (address.to_string(), port);
            }
        }
        match authority.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (host.to_string(), default_port),
            },
            _ => (authority.to_string(), default_port),
        }
    }

    /// 书签文件名 `<uuid>.duck`
    pub fn bookmark_file_name(&self) -> String {
        format!("{}.duck", self.uuid)
    }
}
