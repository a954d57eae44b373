pub mod crypto;

pub use crypto::{
    base64url_encode, constant_time_eq, hmac_sha256_hex, pkce_challenge, secure_random_hex,
    sha256,
};
