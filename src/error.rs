use thiserror::Error;

/// Inbound frame the relay could not make sense of. The frame is dropped and
/// the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not text")]
    NotText,
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("ciphertext too short ({0} bytes)")]
    TooShort(usize),
    #[error("decryption failed")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("plaintext is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not encrypt message: {0}")]
    Cipher(#[from] CipherError),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
}
