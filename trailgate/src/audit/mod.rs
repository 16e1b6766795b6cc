//! 監査ログシステム
//!
//! セキュリティ上重要な操作と全HTTPリクエストの結果を、
//! リクエスト経路に待ち時間を足さずに記録する

/// 監査ログの型定義
pub mod types;

/// リクエストコンテキストと識別情報
pub mod context;

/// 監査イベントレコーダー
pub mod recorder;

/// リクエストインターセプタ
pub mod middleware;

/// JSON / CSV エクスポート
pub mod export;
