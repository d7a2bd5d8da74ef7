//! 带时间戳的改名

use crate::core::target::{Target, TargetAccess};
use crate::error::Result;
use chrono::{DateTime, Local};

/// 生成 `名称_时间戳.扩展名`
pub fn timestamped_name(name: &str, timestamp: DateTime<Local>) -> String {
    let dt = timestamp.format("%Y%m%d_%H%M%S").to_string();
    match name.rfind('.') {
        Some(pos) if pos > 0 => {
            let (stem, ext) = name.split_at(pos);
            format!("{}_{}{}", stem, dt, ext)
        }
        _ => format!("{}_{}", name, dt),
    }
}

fn numbered(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(pos) if pos > 0 => {
            let (stem, ext) = name.split_at(pos);
            format!("{}-{}{}", stem, n, ext)
        }
        _ => format!("{}-{}", name, n),
    }
}

/// 在同一目录下寻找未被占用的带时间戳名称
pub async fn unused_name(access: &TargetAccess, target: &Target) -> Result<Target> {
    let base = timestamped_name(&target.name(), Local::now());
    let mut candidate = target.with_name(&base);
    let mut n = 1;
    while access.exists(&candidate).await? {
        candidate = target.with_name(&numbered(&base, n));
        n += 1;
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_timestamped_name() {
        let ts = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(timestamped_name("report.pdf", ts), "report_20240305_140709.pdf");
        assert_eq!(timestamped_name("Makefile", ts), "Makefile_20240305_140709");
        assert_eq!(timestamped_name(".profile", ts), ".profile_20240305_140709");
    }

    #[tokio::test]
    async fn test_unused_name_skips_taken() {
        let dir = TempDir::new().unwrap();
        let target = Target::Local(dir.path().join("a.txt"));
        let first = unused_name(&TargetAccess::Local, &target).await.unwrap();
        std::fs::write(first.local().unwrap(), b"x").unwrap();

        let second = unused_name(&TargetAccess::Local, &target).await.unwrap();
        assert_ne!(first, second);
        assert!(second.name().starts_with("a_"));
        assert!(second.name().ends_with(".txt"));
    }
}
