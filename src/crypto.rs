//! Подписи как opaque capability
//!
//! Ядро finality не знает алгоритма подписи: heartbeat проверяется через
//! `Verifier`, участник подписывает через `Signer`. Реализация по умолчанию:
//! ML-DSA-65 (Dilithium3).

use pqcrypto_dilithium::dilithium3;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _};
use sha3::{Digest, Sha3_256};

use crate::types::{Hash, PublicKey, Signature};

/// Trait for signing operations
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Signature;
    fn public_key(&self) -> PublicKey;
}

/// Trait for verification operations
pub trait Verifier: Send + Sync {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

pub fn sha3(data: &[u8]) -> Hash {
    Sha3_256::digest(data).into()
}

/// ML-DSA-65 keypair
pub struct Keypair {
    pub public: PublicKey,
    secret: dilithium3::SecretKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let (pk, sk) = dilithium3::keypair();
        Self {
            public: pk.as_bytes().to_vec(),
            secret: sk,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        dilithium3::detached_sign(message, &self.secret).as_bytes().to_vec()
    }
}

impl Signer for Keypair {
    fn sign(&self, message: &[u8]) -> Signature {
        Keypair::sign(self, message)
    }

    fn public_key(&self) -> PublicKey {
        self.public.clone()
    }
}

/// Проверка ML-DSA-65 подписей; мусорные ключи и подписи дают false
#[derive(Debug, Default, Clone, Copy)]
pub struct DilithiumVerifier;

impl Verifier for DilithiumVerifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(pk) = dilithium3::PublicKey::from_bytes(public_key) else {
            return false;
        };
        let Ok(sig) = dilithium3::DetachedSignature::from_bytes(signature) else {
            return false;
        };
        dilithium3::verify_detached_signature(&sig, message, &pk).is_ok()
    }
}
