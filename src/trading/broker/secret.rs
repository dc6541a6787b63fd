use std::env;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// AES-256-GCM的nonce长度
const NONCE_LEN: usize = 12;

/// 券商凭证的落库加密器。密钥由CREDENTIAL_SECRET_KEY经SHA-256派生，
/// 存储格式是 base64(nonce || ciphertext)，nonce每次加密随机生成
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    pub fn from_env() -> Result<CredentialCipher, AppError> {
        let secret = env::var("CREDENTIAL_SECRET_KEY")
            .map_err(|_| AppError::Config("缺少CREDENTIAL_SECRET_KEY".to_string()))?;
        if secret.trim().is_empty() {
            return Err(AppError::Config("CREDENTIAL_SECRET_KEY不能为空".to_string()));
        }
        Ok(Self::from_secret(&secret))
    }

    pub fn from_secret(secret: &str) -> CredentialCipher {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        CredentialCipher { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| AppError::Cipher(format!("密钥长度非法: {}", e)))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Cipher("加密失败".to_string()))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed_b64: &str) -> Result<String, AppError> {
        let sealed = STANDARD
            .decode(sealed_b64)
            .map_err(|e| AppError::Cipher(format!("密文base64损坏: {}", e)))?;
        if sealed.len() <= NONCE_LEN {
            return Err(AppError::Cipher("密文长度不足".to_string()));
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| AppError::Cipher(format!("密钥长度非法: {}", e)))?;
        let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
        let plaintext = cipher
            .decrypt(nonce, &sealed[NONCE_LEN..])
            .map_err(|_| AppError::Cipher("解密失败, 密钥不匹配或密文被篡改".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|e| AppError::Cipher(format!("明文不是合法UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = CredentialCipher::from_secret("unit-test-secret");
        let sealed = cipher.encrypt("PSA1B2C3-app-key").unwrap();
        assert_ne!(sealed, "PSA1B2C3-app-key");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "PSA1B2C3-app-key");
    }

    #[test]
    fn test_nonce_randomized() {
        let cipher = CredentialCipher::from_secret("unit-test-secret");
        let a = cipher.encrypt("same-input").unwrap();
        let b = cipher.encrypt("same-input").unwrap();
        // nonce随机，密文不应重复
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = CredentialCipher::from_secret("key-a");
        let other = CredentialCipher::from_secret("key-b");
        let sealed = cipher.encrypt("secret-value").unwrap();
        assert!(matches!(
            other.decrypt(&sealed),
            Err(AppError::Cipher(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = CredentialCipher::from_secret("key-a");
        let sealed = cipher.encrypt("secret-value").unwrap();
        let mut bytes = STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = STANDARD.encode(bytes);
        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(AppError::Cipher(_))
        ));
    }
}
