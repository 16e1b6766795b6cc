//! IPアドレス抽出・正規化ユーティリティ
//!
//! プロキシ/CDN経由のリクエストからクライアントIPを導出する

use axum::http::HeaderMap;
use std::net::IpAddr;

/// クライアントIPが特定できない場合の値
pub const UNKNOWN_IP: &str = "unknown";

/// 参照するヘッダー（優先順）
const IP_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// IPアドレスを正規化する
///
/// IPv4-mapped IPv6（::ffff:x.x.x.x）をIPv4に変換。
/// それ以外はそのまま返す。
pub fn normalize_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                IpAddr::V4(v4)
            } else {
                IpAddr::V6(v6)
            }
        }
        v4 => v4,
    }
}

/// ヘッダーからクライアントIPを導出する
///
/// `x-forwarded-for`（先頭ホップ）→ `x-real-ip` → `cf-connecting-ip` の順に参照し、
/// いずれも無ければ `"unknown"` を返す。IPとして解釈できる値は正規化する。
pub fn client_ip_from_headers(headers: &HeaderMap) -> String {
    for name in IP_HEADERS {
        let candidate = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim())
            .filter(|s| !s.is_empty());

        if let Some(value) = candidate {
            return match value.parse::<IpAddr>() {
                Ok(ip) => normalize_ip(ip).to_string(),
                Err(_) => value.to_string(),
            };
        }
    }
    UNKNOWN_IP.to_string()
}
