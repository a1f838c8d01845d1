// src/utils/id_generator.rs
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    Driver,
    Request,
}

impl IdType {
    pub fn to_prefix(&self) -> &'static str {
        match self {
            IdType::Driver => "drv",
            IdType::Request => "req",
        }
    }
}

const HEX_CHARS: &[u8] = b"0123456789abcdef";
const ALPHANUMERIC_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub struct IdGenerator;

impl IdGenerator {
    /// Generate a unique ID with format: {prefix}-{yymmdd}-{random_suffix}
    pub fn generate(id_type: IdType) -> String {
        Self::generate_with_timestamp(id_type, Utc::now())
    }

    pub fn generate_with_timestamp(id_type: IdType, timestamp: DateTime<Utc>) -> String {
        let date_part = timestamp.format("%y%m%d");
        format!("{}-{}-{}", id_type.to_prefix(), date_part, Self::generate_random_suffix())
    }

    /// 5 characters: 3 hex + 2 alphanumeric, or the reverse
    fn generate_random_suffix() -> String {
        let mut rng = rand::rng();
        let (first, second) = if rng.random_bool(0.5) {
            (HEX_CHARS, ALPHANUMERIC_CHARS)
        } else {
            (ALPHANUMERIC_CHARS, HEX_CHARS)
        };

        let mut suffix = Self::generate_from_chars(&mut rng, first, 3);
        suffix.push_str(&Self::generate_from_chars(&mut rng, second, 2));
        suffix
    }

    fn generate_from_chars(rng: &mut impl Rng, charset: &[u8], n: usize) -> String {
        (0..n)
            .map(|_| charset[rng.random_range(0..charset.len())] as char)
            .collect()
    }
}

pub fn generate_driver_id() -> String {
    IdGenerator::generate(IdType::Driver)
}

pub fn generate_request_id() -> String {
    IdGenerator::generate(IdType::Request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn test_id_generation() {
        let driver_id = generate_driver_id();
        assert!(driver_id.starts_with("drv-"));
        assert_eq!(driver_id.split('-').count(), 3);

        assert!(generate_request_id().starts_with("req-"));
    }

    #[test]
    fn test_date_part_follows_timestamp() {
        let test_date = Utc.with_ymd_and_hms(2023, 12, 7, 15, 30, 0).unwrap();
        let id = IdGenerator::generate_with_timestamp(IdType::Request, test_date);

        let parts: Vec<_> = id.split('-').collect();
        assert_eq!(parts[0], "req");
        assert_eq!(parts[1], "231207");
        assert_eq!(parts[2].len(), 5);
    }

    #[test]
    fn test_random_suffix_pattern() {
        for _ in 0..100 {
            let suffix = IdGenerator::generate_random_suffix();
            assert_eq!(suffix.len(), 5);
            assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()), "{}", suffix);
        }
    }

    #[test]
    fn test_ids_are_mostly_unique() {
        let ids: Vec<_> = (0..20).map(|_| generate_driver_id()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        // 5-char suffix collisions are possible but vanishingly rare at this size
        assert!(unique.len() >= 19);
    }
}
