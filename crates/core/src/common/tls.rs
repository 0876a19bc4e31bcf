use rustls::crypto::CryptoProvider;
use tracing::debug;

/// # Summary
/// 确保进程级 rustls 加密后端已安装。
///
/// # Logic
/// 1. 若已存在默认 CryptoProvider，直接返回。
/// 2. 否则安装 ring 后端；并发安装失败说明其他调用方已抢先完成，视为成功。
///
/// # Invariants
/// - reqwest 与 tokio-tungstenite 均以 "no-provider" 方式接入 rustls，任何 TLS 连接前必须调用本函数。
pub fn ensure_crypto_provider() {
    if CryptoProvider::get_default().is_some() {
        return;
    }
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed by another caller");
    }
}
