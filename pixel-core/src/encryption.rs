use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use hex;
use hkdf::Hkdf;
use sha2::Sha256;

/// Encrypt a platform access credential using AES-256-GCM.
/// Derives a shop-specific key from the master encryption key so a leaked
/// row from one shop cannot decrypt another shop's tokens.
pub fn encrypt_credential(plaintext: &str, shop_id: &str, master_key: &str) -> Result<String> {
    let key = derive_shop_key(master_key, shop_id)?;

    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    // Nonce prepended to ciphertext, base64 envelope
    let mut encrypted_data = nonce.to_vec();
    encrypted_data.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(&encrypted_data))
}

/// Decrypt a stored credential envelope back to the plaintext token.
pub fn decrypt_credential(envelope: &str, shop_id: &str, master_key: &str) -> Result<String> {
    let encrypted_data = STANDARD
        .decode(envelope)
        .map_err(|e| anyhow!("Base64 decode failed: {}", e))?;

    if encrypted_data.len() < 12 {
        return Err(anyhow!("Invalid encrypted data: too short"));
    }

    let nonce = Nonce::from_slice(&encrypted_data[..12]);
    let ciphertext = &encrypted_data[12..];

    let key = derive_shop_key(master_key, shop_id)?;
    let cipher = Aes256Gcm::new(&key);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8 after decryption: {}", e))
}

/// Derive a shop-specific encryption key using HKDF.
fn derive_shop_key(master_key: &str, shop_id: &str) -> Result<Key<Aes256Gcm>> {
    // Master key is hex (32 bytes = 64 chars) or raw bytes padded to 32
    let master_key_bytes = if master_key.len() == 64 {
        hex::decode(master_key).map_err(|e| anyhow!("Invalid hex master key: {}", e))?
    } else {
        let mut key_bytes = master_key.as_bytes().to_vec();
        key_bytes.resize(32, 0);
        key_bytes
    };

    let hk = Hkdf::<Sha256>::new(None, &master_key_bytes);
    let mut okm = [0u8; 32];
    hk.expand(shop_id.as_bytes(), &mut okm)
        .map_err(|e| anyhow!("HKDF expansion failed: {}", e))?;

    Ok(*Key::<Aes256Gcm>::from_slice(&okm))
}
