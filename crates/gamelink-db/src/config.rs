//! Database configuration

use serde::{Deserialize, Serialize};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub postgres_url: String,
    /// Redis connection URL
    pub redis_url: String,
    /// Maximum PostgreSQL connections
    pub pg_max_connections: u32,
    /// Minimum PostgreSQL connections
    pub pg_min_connections: u32,
    /// Connection acquire timeout in seconds
    pub pg_acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost/gamelink".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            pg_max_connections: 20,
            pg_min_connections: 2,
            pg_acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    /// Mask sensitive parts of the PostgreSQL URL for logging
    pub fn postgres_url_masked(&self) -> String {
        mask_url(&self.postgres_url)
    }

    /// Mask sensitive parts of the Redis URL for logging
    pub fn redis_url_masked(&self) -> String {
        mask_url(&self.redis_url)
    }
}

fn mask_url(url: &str) -> String {
    // Replace the password in user:pass@ with ***
    if let (Some(at_pos), Some(scheme_end)) = (url.rfind('@'), url.find("://")) {
        if at_pos > scheme_end {
            let scheme = &url[..scheme_end + 3];
            let user_pass = &url[scheme_end + 3..at_pos];
            if let Some(colon_pos) = user_pass.find(':') {
                let user = &user_pass[..colon_pos];
                return format!("{}{}:***{}", scheme, user, &url[at_pos..]);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_postgres_url() {
        let masked = mask_url("postgresql://gamelink:s3cret@db:5432/gamelink");
        assert_eq!(masked, "postgresql://gamelink:***@db:5432/gamelink");
    }

    #[test]
    fn test_mask_redis_url() {
        let masked = mask_url("redis://:hunter2@cache:6379");
        assert!(!masked.contains("hunter2"));
    }

    #[test]
    fn test_no_password() {
        let url = "postgresql://localhost/gamelink";
        assert_eq!(mask_url(url), url);
    }
}
