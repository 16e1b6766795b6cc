//! サイズ上限付きファイルライター
//!
//! `tracing_appender` の日次ローテーションファイルを包み、
//! 当日ファイルが上限に達したら `{prefix}.{YYYY-MM-DD}.{n}.log` の
//! セグメントへ書き込み先を切り替える。

use chrono::{Duration, NaiveDate, Utc};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// 1日あたりのセグメント数上限（超過時は古いセグメントから削除）
pub const MAX_DAILY_SEGMENTS: u32 = 32;

/// 日次ファイルにサイズ上限を課すライター
///
/// 上限到達後は同日の次のセグメントへ書き込む。
/// セグメントは保持日数を過ぎたもの、1日あたりの上限を超えたものから削除する。
/// 書き込み失敗は呼び出し側へ返さない（ログ出力でアプリを止めない）。
pub struct SizeCappedWriter<W: Write> {
    inner: W,
    dir: PathBuf,
    prefix: String,
    max_bytes: u64,
    retention_days: usize,
    day: NaiveDate,
    /// 0は `inner`（日次ファイル本体）
    segment: u32,
    segment_file: Option<File>,
    written: u64,
    error_reported: bool,
}

impl<W: Write> SizeCappedWriter<W> {
    /// 新しいライターを作成
    ///
    /// 当日の既存セグメントがあれば最新のものから書き込みを再開する。
    pub fn new(inner: W, dir: &Path, prefix: &str, max_bytes: u64, retention_days: usize) -> Self {
        let mut writer = Self {
            inner,
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            max_bytes,
            retention_days,
            day: Utc::now().date_naive(),
            segment: 0,
            segment_file: None,
            written: 0,
            error_reported: false,
        };
        writer.start_day(Utc::now().date_naive());
        writer
    }

    fn start_day(&mut self, day: NaiveDate) {
        self.day = day;
        self.segment_file = None;
        self.error_reported = false;
        self.prune_segments();

        let latest = self
            .list_segments()
            .into_iter()
            .filter(|(d, _, _)| *d == day)
            .map(|(_, n, _)| n)
            .max();
        match latest {
            Some(n) => {
                self.segment = n;
                self.written = file_size(&segment_file_path(&self.dir, &self.prefix, day, n));
                self.segment_file = self.open_segment(n);
            }
            None => {
                self.segment = 0;
                self.written = file_size(&daily_file_path(&self.dir, &self.prefix, day));
            }
        }
    }

    fn roll_day_if_needed(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.day {
            self.start_day(today);
        }
    }

    fn advance_segment(&mut self) {
        let next = self.segment + 1;
        if let Some(file) = self.open_segment(next) {
            self.segment = next;
            self.segment_file = Some(file);
            self.written = file_size(&segment_file_path(&self.dir, &self.prefix, self.day, next));
            self.prune_segments();
        }
    }

    fn open_segment(&mut self, n: u32) -> Option<File> {
        let path = segment_file_path(&self.dir, &self.prefix, self.day, n);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                self.report_error("open", &e);
                None
            }
        }
    }

    fn list_segments(&self) -> Vec<(NaiveDate, u32, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let (day, n) = parse_segment_name(name.to_str()?, &self.prefix)?;
                Some((day, n, entry.path()))
            })
            .collect()
    }

    fn prune_segments(&self) {
        let oldest_kept = self.day - Duration::days(self.retention_days.saturating_sub(1) as i64);
        let mut today: Vec<(u32, PathBuf)> = Vec::new();
        for (day, n, path) in self.list_segments() {
            if day < oldest_kept {
                let _ = std::fs::remove_file(&path);
            } else if day == self.day {
                today.push((n, path));
            }
        }
        if today.len() > MAX_DAILY_SEGMENTS as usize {
            today.sort_by_key(|(n, _)| *n);
            let excess = today.len() - MAX_DAILY_SEGMENTS as usize;
            for (_, path) in today.into_iter().take(excess) {
                let _ = std::fs::remove_file(&path);
            }
        }
    }

    fn report_error(&mut self, op: &str, e: &io::Error) {
        if !self.error_reported {
            self.error_reported = true;
            eprintln!("failed to {} log file '{}': {}", op, self.prefix, e);
        }
    }
}

/// 日次ローテーションファイルのパス（`{prefix}.{YYYY-MM-DD}.log`）
pub fn daily_file_path(dir: &Path, prefix: &str, day: NaiveDate) -> PathBuf {
    dir.join(format!("{}.{}.log", prefix, day.format("%Y-%m-%d")))
}

/// サイズ超過時のセグメントファイルのパス（`{prefix}.{YYYY-MM-DD}.{n}.log`）
pub fn segment_file_path(dir: &Path, prefix: &str, day: NaiveDate, n: u32) -> PathBuf {
    dir.join(format!("{}.{}.{}.log", prefix, day.format("%Y-%m-%d"), n))
}

fn parse_segment_name(name: &str, prefix: &str) -> Option<(NaiveDate, u32)> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('.')?.strip_suffix(".log")?;
    let (date, n) = rest.split_once('.')?;
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let n = n.parse().ok().filter(|n| *n > 0)?;
    Some((day, n))
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

impl<W: Write> Write for SizeCappedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.roll_day_if_needed();

        // 空のファイルには上限を超えるレコードでもそのまま書く
        if self.written > 0 && self.written.saturating_add(buf.len() as u64) > self.max_bytes {
            self.advance_segment();
        }

        let result = match self.segment_file.as_mut() {
            Some(file) if self.segment > 0 => file.write_all(buf),
            _ => self.inner.write_all(buf),
        };
        match result {
            Ok(()) => self.written += buf.len() as u64,
            Err(e) => self.report_error("write", &e),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = match self.segment_file.as_mut() {
            Some(file) if self.segment > 0 => file.flush(),
            _ => self.inner.flush(),
        };
        if let Err(e) = result {
            self.report_error("flush", &e);
        }
        Ok(())
    }
}
