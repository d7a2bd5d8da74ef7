//! 源与目标的比较（校验和、大小、修改时间）

use crate::model::PathAttributes;
use tracing::debug;

/// 比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    /// 源文件更新
    SourceNewer,
    /// 目标文件更新
    TargetNewer,
    /// 内容或大小不同
    Different,
}

/// 比较配置
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// 时间容差（秒）
    pub time_tolerance_seconds: i64,
    /// 大小相同且无时间信息时认为相同（适用于 WebDAV 等不保留 mtime 的场景）
    pub size_only_for_same_size: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: 2,
            size_only_for_same_size: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonService {
    config: CompareConfig,
}

impl ComparisonService {
    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    pub fn compare(&self, name: &str, source: &PathAttributes, target: &PathAttributes) -> Comparison {
        // 首先检查 checksum（算法一致时）
        if let (Some(src), Some(dst)) = (&source.checksum, &target.checksum) {
            if src.algorithm == dst.algorithm {
                return if src.hash == dst.hash {
                    Comparison::Equal
                } else {
                    Comparison::Different
                };
            }
        }

        // 大小不同，肯定不同
        if source.size != target.size {
            debug!(
                "文件大小不同: {} (src={}, dst={})",
                name, source.size, target.size
            );
            return Comparison::Different;
        }

        let (Some(src_time), Some(dst_time)) = (source.modified, target.modified) else {
            return if self.config.size_only_for_same_size {
                Comparison::Equal
            } else {
                Comparison::Different
            };
        };

        let time_diff = (src_time - dst_time).abs();
        if time_diff <= self.config.time_tolerance_seconds {
            return Comparison::Equal;
        }

        debug!(
            "文件时间不同: {} (src_time={}, dst_time={}, diff={}s)",
            name, src_time, dst_time, time_diff
        );
        if src_time > dst_time {
            Comparison::SourceNewer
        } else {
            Comparison::TargetNewer
        }
    }
}
