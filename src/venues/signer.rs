/// Produces signed venue requests. Raw key material never leaves an
/// implementation of this trait — the engine only ever holds a `dyn Signer`.
pub trait Signer: Send + Sync {
    /// Signs opaque transaction bytes and returns the base58-encoded
    /// signature the venue expects alongside the request.
    fn sign(&self, payload: &[u8]) -> String;

    /// The public address this signer trades from, used for logging and
    /// for matching fills back to the issuing wallet.
    fn public_address(&self) -> &str;
}

/// Loads signing key material from the environment once at startup and
/// never exposes it again. Actual transaction construction/signing is a
/// wallet-provider concern out of scope here (§1 non-goal); this signer's
/// job is only to hold the boundary so live callers never touch a raw key.
pub struct EnvSigner {
    secret: String,
    address: String,
}

impl EnvSigner {
    pub fn from_env() -> Option<Self> {
        let secret = std::env::var("WALLTRACK_SIGNER_KEY").ok()?;
        let address = std::env::var("WALLTRACK_SIGNER_ADDRESS").ok()?;
        Some(Self { secret, address })
    }
}

impl Signer for EnvSigner {
    fn sign(&self, payload: &[u8]) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts key of any length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn public_address(&self) -> &str {
        &self.address
    }
}
