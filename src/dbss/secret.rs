//! The secret (friend) code table (§4.4 `REQUEST_SECRET`/`SUBMIT_SECRET`).
//!
//! Module-level state in the source: one process-wide table, one RNG seeded
//! at boot and reseeded after every mint. Kept in memory only here — the
//! source's `friend_access.dat` persistence has no equivalent config knob
//! in this build (see DESIGN.md).

use std::collections::HashMap;

use otp_proto::DoId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CODE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_LIVE_CODES_PER_AVATAR: usize = 11;
const EXPIRY_SECONDS: i64 = 48 * 60 * 60;

struct SecretEntry {
    avatar_id: DoId,
    expires_at: i64,
}

pub struct SecretTable {
    codes: HashMap<String, SecretEntry>,
    rng: StdRng,
    seed: u64,
}

/// Outcome of `REQUEST_SECRET` (§4.4).
pub struct RequestSecretResult {
    pub code: String,
    pub response_code: u8,
}

impl Default for SecretTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretTable {
    pub fn new() -> Self {
        let seed = rand::thread_rng().r#gen::<u64>();
        Self {
            codes: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    fn gen_code(&mut self) -> String {
        let mut bytes = [0u8; 6];
        for b in &mut bytes {
            *b = CODE_CHARSET[self.rng.gen_range(0..CODE_CHARSET.len())];
        }
        format!(
            "{} {}",
            std::str::from_utf8(&bytes[0..3]).unwrap(),
            std::str::from_utf8(&bytes[3..6]).unwrap()
        )
    }

    /// Mint a code for `avatar_id`, honouring the 11-live-codes cap.
    /// `now` is the caller-supplied wall-clock second count (kept an
    /// argument rather than read internally so tests can control expiry).
    pub fn request_secret(&mut self, avatar_id: DoId, now: i64) -> RequestSecretResult {
        let live_for_avatar = self
            .codes
            .values()
            .filter(|e| e.avatar_id == avatar_id && e.expires_at > now)
            .count();
        if live_for_avatar >= MAX_LIVE_CODES_PER_AVATAR {
            return RequestSecretResult {
                code: String::new(),
                response_code: 0,
            };
        }

        let mut code = self.gen_code();
        while self.codes.contains_key(&code) {
            code = self.gen_code();
        }
        self.codes.insert(
            code.clone(),
            SecretEntry {
                avatar_id,
                expires_at: now + EXPIRY_SECONDS,
            },
        );

        self.seed = self.seed.wrapping_add(avatar_id as u64);
        self.rng = StdRng::seed_from_u64(self.seed);

        RequestSecretResult {
            code,
            response_code: 1,
        }
    }

    /// Consume a code. Returns `1` on a match belonging to another avatar,
    /// `3` if the requester is redeeming its own code, `0` if the code is
    /// unknown or expired (§4.4).
    pub fn submit_secret(&mut self, requester_id: DoId, code: &str, now: i64) -> u8 {
        let Some(entry) = self.codes.remove(code) else {
            return 0;
        };
        if entry.expires_at <= now {
            return 0;
        }
        if entry.avatar_id == requester_id {
            3
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_code_matches_the_xxx_xxx_shape() {
        let mut table = SecretTable::new();
        let result = table.request_secret(42, 0);
        assert_eq!(result.response_code, 1);
        assert_eq!(result.code.len(), 7);
        assert_eq!(result.code.as_bytes()[3], b' ');
    }

    #[test]
    fn submit_secret_round_trips_then_consumes() {
        let mut table = SecretTable::new();
        let minted = table.request_secret(42, 0);
        assert_eq!(table.submit_secret(99, &minted.code, 10), 1);
        assert_eq!(table.submit_secret(99, &minted.code, 10), 0);
    }

    #[test]
    fn self_submission_returns_three() {
        let mut table = SecretTable::new();
        let minted = table.request_secret(42, 0);
        assert_eq!(table.submit_secret(42, &minted.code, 10), 3);
    }

    #[test]
    fn expired_code_is_rejected() {
        let mut table = SecretTable::new();
        let minted = table.request_secret(42, 0);
        let past_expiry = EXPIRY_SECONDS + 1;
        assert_eq!(table.submit_secret(99, &minted.code, past_expiry), 0);
    }

    #[test]
    fn eleventh_code_is_refused_while_ten_remain_live() {
        let mut table = SecretTable::new();
        for _ in 0..11 {
            assert_eq!(table.request_secret(7, 0).response_code, 1);
        }
        let eleventh = table.request_secret(7, 0);
        assert_eq!(eleventh.response_code, 0);
        assert_eq!(eleventh.code, "");
    }
}
