//! Job identifier generation.

use rand::Rng;

use crate::db::job_repository::JobStore;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 8;
const JOB_ID_SUFFIX_LENGTH: usize = 16;

fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Draw an 8-character public code, uniform over `[A-Z0-9]`.
pub fn generate_code() -> String {
    random_string(CODE_LENGTH)
}

/// Internal job id: "ANA" followed by 16 random characters.
pub fn generate_job_id() -> String {
    format!("ANA{}", random_string(JOB_ID_SUFFIX_LENGTH))
}

/// Draw codes until one is unused. The 36^8 space makes collisions
/// astronomically rare, but the retry loop is intentionally uncapped
/// so a pathological collision run can never surface as a spurious
/// submission failure.
pub async fn unique_code(jobs: &dyn JobStore) -> Result<String, sqlx::Error> {
    loop {
        let code = generate_code();
        if !jobs.code_exists(&code).await? {
            return Ok(code);
        }
    }
}
