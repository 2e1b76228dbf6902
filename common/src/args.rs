use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct RedisArgs {
    #[arg(long, env = "REDIS_HOST", default_value = "127.0.0.1")]
    pub redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    #[arg(long, env = "REDIS_USERNAME")]
    pub redis_username: Option<String>,

    #[arg(long, env = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub redis_db: u16,

    #[arg(long, env = "REDIS_PROTO", default_value = "redis")]
    pub redis_proto: String,
}

impl RedisArgs {
    pub fn url_redacted(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}",
            if self.redis_proto.is_empty() {
                "redis"
            } else {
                &self.redis_proto
            },
            self.redis_username.as_deref().unwrap_or(""),
            self.redis_password.as_deref().map(|_| "****").unwrap_or(""),
            self.redis_host,
            self.redis_port,
            self.redis_db,
        )
    }

    pub fn url(&self) -> String {
        let proto = if self.redis_proto.is_empty() {
            "redis"
        } else {
            &self.redis_proto
        };
        let mut url = format!("{}://", proto);
        if let Some(ref username) = self.redis_username {
            url.push_str(username);
            if let Some(ref password) = self.redis_password {
                url.push(':');
                url.push_str(password);
            }
            url.push('@');
        } else if let Some(ref password) = self.redis_password {
            url.push(':');
            url.push_str(password);
            url.push('@');
        }
        url.push_str(&format!(
            "{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        ));
        url
    }
}

/// Connection settings for the cluster master's scheduler API.
#[derive(Parser, Debug, Clone)]
pub struct MasterArgs {
    /// Master address as `host:port`
    #[arg(long, env = "MASTER", default_value = "127.0.0.1:5050")]
    pub master: String,

    /// Talk to the master over https
    #[arg(long, env = "MASTER_SSL", default_value_t = false)]
    pub master_ssl: bool,

    /// Skip TLS certificate verification
    #[arg(long, env = "MASTER_SSL_SKIP_VERIFY", default_value_t = false)]
    pub master_ssl_skip_verify: bool,

    #[arg(long, env = "MASTER_USERNAME", default_value = "")]
    pub master_username: String,

    #[arg(long, env = "MASTER_PASSWORD", default_value = "")]
    pub master_password: String,

    /// Timeout for synchronous calls, in seconds (the subscription stream
    /// itself is unbounded)
    #[arg(long, env = "MASTER_CALL_TIMEOUT_SECONDS", default_value_t = 30)]
    pub master_call_timeout_seconds: u64,
}

impl MasterArgs {
    pub fn base_url(&self) -> String {
        let protocol = if self.master_ssl { "https" } else { "http" };
        format!("{}://{}", protocol, self.master)
    }
}

/// Credentials and bind address for the admin HTTP surface.
#[derive(Parser, Debug, Clone)]
pub struct ApiArgs {
    #[arg(long, env = "API_PORT", default_value_t = 10000)]
    pub api_port: u16,

    #[arg(long, env = "API_USERNAME", default_value = "user")]
    pub api_username: String,

    #[arg(long, env = "API_PASSWORD", default_value = "password")]
    pub api_password: String,
}
