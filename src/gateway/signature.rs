//! HMAC-SHA256 signatures over the canonical field string.

use super::codec::{FieldSet, fields};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature field missing")]
    Missing,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature does not match")]
    Mismatch,
    #[error("merchant secret is unusable")]
    InvalidKey,
}

fn mac_for(secret: &[u8], fields: &FieldSet) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(fields.canonical_string().as_bytes());
    Ok(mac)
}

/// Lowercase hex signature for `fields`.
pub fn sign(secret: &[u8], fields: &FieldSet) -> Result<String, SignatureError> {
    let mac = mac_for(secret, fields)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Replaces any existing signature with a fresh one.
pub fn sign_in_place(secret: &[u8], fields: &mut FieldSet) -> Result<(), SignatureError> {
    fields.remove(fields::SIGNATURE);
    let signature = sign(secret, fields)?;
    fields.insert(fields::SIGNATURE, signature);
    Ok(())
}

/// Constant-time verification of the `signature` field.
pub fn verify(secret: &[u8], fields: &FieldSet) -> Result<(), SignatureError> {
    let provided = fields.get(fields::SIGNATURE).ok_or(SignatureError::Missing)?;
    let provided = hex::decode(provided.trim()).map_err(|_| SignatureError::Malformed)?;
    mac_for(secret, fields)?
        .verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}
