//! 共通ユーティリティ

/// エラー型
pub mod error;

/// IPアドレス抽出
pub mod ip;
