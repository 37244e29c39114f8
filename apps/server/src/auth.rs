use argon2::Argon2;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(pw: &str) -> anyhow::Result<String> {
    hash_with(&Argon2::default(), pw)
}

pub fn hash_with(argon: &Argon2<'_>, pw: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut password_hash::rand_core::OsRng);
    let hash = argon
        .hash_password(pw.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash_password failed: {e}"))?
        .to_string();
    Ok(hash)
}

/// Parameters come from the stored hash, so cheap test hashes verify cheaply.
pub fn verify_password(hash: &str, pw: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(ph) => Argon2::default().verify_password(pw.as_bytes(), &ph).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
pub fn cheap_hash(pw: &str) -> String {
    let params = argon2::Params::new(8, 1, 1, None).unwrap();
    let argon = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    hash_with(&argon, pw).unwrap()
}
