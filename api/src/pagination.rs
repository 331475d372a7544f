//! `maxResults` / `nextToken` handling shared by every List* action.

use crate::error::{ApiError, Result};

pub const DEFAULT_PAGE: i64 = 100;
pub const MAX_PAGE: i64 = 100;

pub fn page_size(max_results: Option<i64>) -> Result<i64> {
    match max_results {
        None => Ok(DEFAULT_PAGE),
        Some(v) if (1..=MAX_PAGE).contains(&v) => Ok(v),
        Some(v) => Err(ApiError::InvalidParameter(format!(
            "maxResults must be between 1 and {MAX_PAGE}, got {v}"
        ))),
    }
}

pub fn offset(next_token: Option<&str>) -> Result<i64> {
    match next_token {
        None => Ok(0),
        Some(token) => kecs_common::token::decode(token)
            .ok_or_else(|| ApiError::InvalidParameter("invalid nextToken".to_string())),
    }
}

/// A follow-up token is handed out whenever the page came back full.
pub fn next_token(offset: i64, page_len: usize, limit: i64) -> Option<String> {
    (page_len as i64 >= limit).then(|| kecs_common::token::encode(offset + limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_bounds() {
        assert_eq!(page_size(None).unwrap(), 100);
        assert_eq!(page_size(Some(1)).unwrap(), 1);
        assert_eq!(page_size(Some(100)).unwrap(), 100);
        assert!(page_size(Some(0)).is_err());
        assert!(page_size(Some(101)).is_err());
        assert!(page_size(Some(-3)).is_err());
    }

    #[test]
    fn token_round_trip() {
        let token = next_token(0, 100, 100).expect("full page yields token");
        assert_eq!(offset(Some(&token)).unwrap(), 100);
        assert!(next_token(0, 40, 100).is_none());
        assert!(offset(Some("garbage")).is_err());
    }
}
